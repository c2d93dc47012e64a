//! Partitioned datasets: one write buffer + bucket pair per key.
//!
//! A [`Partitioner`] owns many independent file pairs inside one directory,
//! named `<db>_<key>_structure.dat` / `<db>_<key>_string.dat`. On open it
//! rebuilds its map by enumerating the directory and parsing the key out of
//! each structure-file name; the key is the entire substring between the
//! database prefix and the suffix, so string keys containing underscores
//! round-trip, and names whose key fails to parse are ignored. Partitions
//! referenced for the first time are created lazily and only disappear
//! through explicit deletion.
//!
//! There is no ordering, and no transaction, across partitions.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Display,
    hash::Hash,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_stream::try_stream;
use futures::{future::try_join_all, Stream};
use parking_lot::Mutex;
use snafu::ResultExt;

use crate::{
    bucket::{RecordBucket, Recordable, DEFAULT_ENUMERATION_PAGE_SIZE},
    error::{IoSnafu, Result},
    store::StoreConfig,
    write_buffer::{WriteBuffer, WriteBufferConfig},
    Error,
};

const STRUCTURE_SUFFIX: &str = "_structure.dat";
const STRING_SUFFIX: &str = "_string.dat";

/// Key type for partitioned datasets.
///
/// Implemented for every type that can round-trip through its string form;
/// the string form names the partition's files on disk.
pub trait PartitionKey:
    FromStr + Display + Ord + Hash + Eq + Clone + Send + Sync + 'static
{
}

impl<T> PartitionKey for T where
    T: FromStr + Display + Ord + Hash + Eq + Clone + Send + Sync + 'static
{
}

/// A record that knows which partition it belongs to.
pub trait Partitioned: Recordable {
    type Key: PartitionKey;

    fn partition_key(&self) -> Self::Key;
}

/// Tuning shared by every partition of one database.
#[derive(Clone, Copy, Debug, Default)]
pub struct PartitionerConfig {
    pub store: StoreConfig,
    pub write_buffer: WriteBufferConfig,
    pub enumeration_page_size: usize,
}

impl PartitionerConfig {
    fn enumeration_page_size(&self) -> usize {
        if self.enumeration_page_size == 0 {
            DEFAULT_ENUMERATION_PAGE_SIZE
        } else {
            self.enumeration_page_size
        }
    }
}

/// Dispatches records by partition key to per-key buffered buckets.
pub struct Partitioner<R: Partitioned> {
    db_name: String,
    directory: PathBuf,
    config: PartitionerConfig,
    partitions: Mutex<HashMap<R::Key, WriteBuffer<R, RecordBucket<R>>>>,
}

impl<R: Partitioned> Partitioner<R> {
    /// Opens the database, bootstrapping its partition map from the file
    /// names already in `directory`.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the directory cannot be created or scanned, and
    /// any error from opening a discovered partition's bucket (notably
    /// `Corruption` for a torn append).
    pub async fn open(
        db_name: impl Into<String>,
        directory: impl AsRef<Path>,
        config: PartitionerConfig,
    ) -> Result<Self> {
        let db_name = db_name.into();
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await.context(IoSnafu {
            operation: "create database directory",
        })?;

        let partitioner = Self {
            db_name,
            directory,
            config,
            partitions: Mutex::new(HashMap::new()),
        };

        let prefix = format!("{}_", partitioner.db_name);
        let mut entries = tokio::fs::read_dir(&partitioner.directory)
            .await
            .context(IoSnafu {
                operation: "scan database directory",
            })?;
        while let Some(entry) = entries.next_entry().await.context(IoSnafu {
            operation: "scan database directory",
        })? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(key_text) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(STRUCTURE_SUFFIX))
            else {
                continue;
            };
            // Names whose key does not parse are not ours.
            let Ok(key) = key_text.parse::<R::Key>() else {
                continue;
            };
            debug!(partition = key_text, "Discovered existing partition.");
            partitioner.get_or_create(&key)?;
        }

        Ok(partitioner)
    }

    /// Number of known partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.lock().len()
    }

    /// Every known partition key, in sorted order.
    pub fn partition_keys(&self) -> Vec<R::Key> {
        let mut keys: Vec<_> = self.partitions.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Groups `records` by partition key and enqueues each group into its
    /// partition's write buffer. Grouping is deterministic (sorted by key);
    /// within one partition the batch keeps its input order.
    pub async fn add(&self, records: Vec<R>) -> Result<()> {
        let mut groups: BTreeMap<R::Key, Vec<R>> = BTreeMap::new();
        for record in records {
            groups.entry(record.partition_key()).or_default().push(record);
        }

        for (key, group) in groups {
            let buffer = self.get_or_create(&key)?;
            buffer.add(group)?;
        }

        Ok(())
    }

    /// Reads record `index` of partition `key`.
    pub async fn read(&self, key: &R::Key, index: usize) -> Result<R> {
        self.partition(key)?.read(index).await
    }

    /// Reads `count` records of partition `key` starting at `index`.
    pub async fn read_bulk(&self, key: &R::Key, index: usize, count: usize) -> Result<Vec<R>> {
        self.partition(key)?.read_bulk(index, count).await
    }

    /// Bulk-reads every partition concurrently and concatenates the
    /// results. Order across partitions is unspecified.
    pub async fn read_all(&self) -> Result<Vec<R>> {
        let buffers: Vec<_> = self.partitions.lock().values().cloned().collect();
        let reads = buffers
            .into_iter()
            .map(|buffer| async move { buffer.read_all().await });

        Ok(try_join_all(reads).await?.into_iter().flatten().collect())
    }

    /// Total record count across every partition, buffered records
    /// included.
    pub fn count(&self) -> usize {
        self.partitions.lock().values().map(WriteBuffer::count).sum()
    }

    /// Record count of partition `key`.
    pub fn count_of(&self, key: &R::Key) -> Result<usize> {
        Ok(self.partition(key)?.count())
    }

    /// Syncs the partition's buffer, deletes both of its files, and forgets
    /// the key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no such partition exists.
    pub async fn delete_partition(&self, key: &R::Key) -> Result<()> {
        let buffer = self
            .partitions
            .lock()
            .remove(key)
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })?;
        buffer.delete().await
    }

    /// Completes when every partition's enqueued records are archived and
    /// flushed.
    pub async fn sync(&self) -> Result<()> {
        let buffers: Vec<_> = self.partitions.lock().values().cloned().collect();
        try_join_all(buffers.into_iter().map(|buffer| async move {
            buffer.sync().await
        }))
        .await?;
        Ok(())
    }

    /// Syncs every partition before the partitioner is released.
    pub async fn close(&self) -> Result<()> {
        self.sync().await
    }

    /// Lazily yields partition `key` front to back.
    pub fn as_enumerable(&self, key: &R::Key) -> Result<impl Stream<Item = Result<R>>> {
        let buffer = self.partition(key)?;
        let page = self.config.enumeration_page_size();
        Ok(try_stream! {
            let total = buffer.count();
            let mut index = 0;
            while index < total {
                let span = page.min(total - index);
                let records = buffer.read_bulk(index, span).await?;
                for record in records {
                    yield record;
                }
                index += span;
            }
        })
    }

    /// Lazily yields partition `key` back to front.
    pub fn as_reverse_enumerable(&self, key: &R::Key) -> Result<impl Stream<Item = Result<R>>> {
        let buffer = self.partition(key)?;
        let page = self.config.enumeration_page_size();
        Ok(try_stream! {
            let mut remaining = buffer.count();
            while remaining > 0 {
                let span = page.min(remaining);
                let records = buffer.read_bulk(remaining - span, span).await?;
                for record in records.into_iter().rev() {
                    yield record;
                }
                remaining -= span;
            }
        })
    }

    /// Diagnostic counters for every partition.
    pub fn output_statistics(&self) -> String {
        let keys = self.partition_keys();
        let partitions = self.partitions.lock();
        let mut out = format!(
            "partitioner {}: partitions={}\n",
            self.db_name,
            partitions.len()
        );
        for key in keys {
            if let Some(buffer) = partitions.get(&key) {
                out.push_str(&format!("[{key}] {}\n", buffer.output_statistics()));
            }
        }
        out
    }

    /// Looks up an existing partition's buffer.
    fn partition(&self, key: &R::Key) -> Result<WriteBuffer<R, RecordBucket<R>>> {
        self.partitions
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })
    }

    /// Returns the partition's buffer, creating its file pair on first
    /// reference. Synchronized by the partition-map mutex.
    fn get_or_create(&self, key: &R::Key) -> Result<WriteBuffer<R, RecordBucket<R>>> {
        let mut partitions = self.partitions.lock();
        if let Some(buffer) = partitions.get(key) {
            return Ok(buffer.clone());
        }

        let key_text = key.to_string();
        if key_text.is_empty() || key_text.contains(['/', '\\']) {
            return Err(Error::Schema {
                reason: format!("partition key '{key_text}' cannot name a file"),
            });
        }

        let structure_path = self
            .directory
            .join(format!("{}_{key_text}{STRUCTURE_SUFFIX}", self.db_name));
        let string_path = self
            .directory
            .join(format!("{}_{key_text}{STRING_SUFFIX}", self.db_name));
        let bucket = RecordBucket::open(&structure_path, &string_path, self.config.store)?;
        let buffer = WriteBuffer::new(bucket, self.config.write_buffer);
        partitions.insert(key.clone(), buffer.clone());

        Ok(buffer)
    }
}
