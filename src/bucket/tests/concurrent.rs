use std::sync::Arc;

use rand::Rng;

use crate::{
    bucket::{RecordBucket, RecordStore},
    test_util::with_temp_dir,
};

use super::{small_store_config, Pair};

const WRITER_THREADS: usize = 16;
const RECORDS_PER_THREAD: i32 = 250;
const BATCH: i32 = 10;

/// Concurrent appenders lose nothing and duplicate nothing, and each
/// thread's records stay in its program order.
#[test]
fn concurrent_adds_preserve_every_record() {
    with_temp_dir(|dir| {
        let bucket = Arc::new(
            RecordBucket::<Pair>::open(
                &dir.join("pairs_structure.dat"),
                &dir.join("pairs_string.dat"),
                small_store_config(),
            )
            .expect("open should not fail"),
        );

        let handles: Vec<_> = (0..WRITER_THREADS)
            .map(|thread| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || {
                    let base = thread as i32 * RECORDS_PER_THREAD;
                    let mut next = 0;
                    while next < RECORDS_PER_THREAD {
                        let batch: Vec<_> = (next..(next + BATCH).min(RECORDS_PER_THREAD))
                            .map(|i| Pair {
                                i: base + i,
                                s: format!("t{thread}:{i}"),
                            })
                            .collect();
                        next += batch.len() as i32;
                        bucket.add(batch).expect("add should not fail");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread should not panic");
        }

        let total = WRITER_THREADS * RECORDS_PER_THREAD as usize;
        assert_eq!(bucket.count(), total);

        let all = bucket
            .read_bulk(0, total)
            .expect("read_bulk should not fail");

        // Multiset equality: sorting by the monotonically-increasing field
        // restores exactly the full input set.
        let mut ids: Vec<_> = all.iter().map(|p| p.i).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..total as i32).collect::<Vec<_>>());

        // Within one thread, batch ranges are disjoint and ordered by lock
        // acquisition, so each thread's subsequence stays monotone.
        for thread in 0..WRITER_THREADS as i32 {
            let lo = thread * RECORDS_PER_THREAD;
            let hi = lo + RECORDS_PER_THREAD;
            let subsequence: Vec<_> =
                all.iter().map(|p| p.i).filter(|i| (lo..hi).contains(i)).collect();
            assert!(
                subsequence.windows(2).all(|w| w[0] < w[1]),
                "thread {thread} records reordered"
            );
        }

        // String handles were fanned back to the right records.
        for pair in &all {
            let thread = pair.i / RECORDS_PER_THREAD;
            let i = pair.i % RECORDS_PER_THREAD;
            assert_eq!(pair.s, format!("t{thread}:{i}"));
        }
    });
}

/// Readers running against a live writer only ever observe fully archived,
/// self-consistent records.
#[test]
fn readers_never_observe_partial_slots() {
    with_temp_dir(|dir| {
        let bucket = Arc::new(
            RecordBucket::<Pair>::open(
                &dir.join("pairs_structure.dat"),
                &dir.join("pairs_string.dat"),
                small_store_config(),
            )
            .expect("open should not fail"),
        );

        let writer = {
            let bucket = Arc::clone(&bucket);
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut written = 0;
                while written < 2000 {
                    let batch_len = rng.gen_range(1..=32).min(2000 - written);
                    let batch: Vec<_> = (written..written + batch_len)
                        .map(|i| Pair {
                            i,
                            s: format!("payload-{i}"),
                        })
                        .collect();
                    written += batch_len;
                    bucket.add(batch).expect("add should not fail");
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || {
                    loop {
                        let archived = bucket.count();
                        if archived > 0 {
                            let all = bucket
                                .read_bulk(0, archived)
                                .expect("read_bulk should not fail");
                            for pair in all {
                                assert_eq!(pair.s, format!("payload-{}", pair.i));
                            }
                        }
                        if archived >= 2000 {
                            break;
                        }
                        std::thread::yield_now();
                    }
                })
            })
            .collect();

        writer.join().expect("writer thread should not panic");
        for reader in readers {
            reader.join().expect("reader thread should not panic");
        }

        assert_eq!(bucket.count(), 2000);
    });
}
