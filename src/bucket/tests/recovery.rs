use std::io::{Seek, SeekFrom, Write};

use crate::{
    bucket::{RecordBucket, RecordStore},
    test_util::with_temp_dir,
    Error,
};

use super::{small_store_config, Pair};

/// Stamps the two header counters directly, simulating the state a crash
/// leaves behind.
fn stamp_header(path: &std::path::Path, provisioned: u32, archived: u32) {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("structure file should open");
    file.seek(SeekFrom::Start(0)).expect("seek should not fail");
    file.write_all(&provisioned.to_le_bytes())
        .expect("write should not fail");
    file.write_all(&archived.to_le_bytes())
        .expect("write should not fail");
}

#[test]
fn torn_append_fails_reopen() {
    with_temp_dir(|dir| {
        let structure = dir.join("pairs_structure.dat");
        let string = dir.join("pairs_string.dat");
        {
            let bucket = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
                .expect("open should not fail");
            bucket
                .add(vec![Pair {
                    i: 1,
                    s: "x".to_string(),
                }])
                .expect("add should not fail");
        }

        // A crash between provisioning and archival leaves the counters
        // disagreeing.
        stamp_header(&structure, 2, 1);

        let err = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
            .expect_err("reopen should fail");
        match err {
            Error::Corruption { reason } => assert!(
                reason.contains("torn append"),
                "unexpected corruption reason: {reason}"
            ),
            other => panic!("expected Corruption, got {other:?}"),
        }
    });
}

#[test]
fn archived_beyond_provisioned_fails_reopen() {
    with_temp_dir(|dir| {
        let structure = dir.join("pairs_structure.dat");
        let string = dir.join("pairs_string.dat");
        {
            let _bucket = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
                .expect("open should not fail");
        }

        stamp_header(&structure, 1, 2);

        let err = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
            .expect_err("reopen should fail");
        assert!(matches!(err, Error::Corruption { .. }));
    });
}

#[test]
fn clean_shutdown_reopens_with_data() {
    with_temp_dir(|dir| {
        let structure = dir.join("pairs_structure.dat");
        let string = dir.join("pairs_string.dat");
        let records: Vec<_> = (0..5)
            .map(|i| Pair {
                i,
                s: format!("value-{i}"),
            })
            .collect();
        {
            let bucket = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
                .expect("open should not fail");
            bucket.add(records.clone()).expect("add should not fail");
            bucket.sync().expect("sync should not fail");
        }

        let bucket = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
            .expect("reopen should not fail");
        assert_eq!(bucket.count(), 5);
        assert_eq!(
            bucket.read_bulk(0, 5).expect("read_bulk should not fail"),
            records
        );
    });
}

#[test]
fn second_owner_is_locked_out() {
    with_temp_dir(|dir| {
        let structure = dir.join("pairs_structure.dat");
        let string = dir.join("pairs_string.dat");
        let _bucket = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
            .expect("open should not fail");

        let err = RecordBucket::<Pair>::open(&structure, &string, small_store_config())
            .expect_err("second open should fail");
        assert!(matches!(err, Error::Io { .. }));
    });
}
