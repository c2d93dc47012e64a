//! Typed record buckets over a slot file and string heap.
//!
//! A bucket owns one `<name>_structure.dat` / `<name>_string.dat` file pair.
//! The structure file reserves bytes 0..8 for two little-endian u32
//! counters, `provisioned` and `archived`, and packs fixed-width slots from
//! byte 8 onward. Provisioning and archival are deliberately split: an
//! append first claims its slot range by advancing `provisioned`, then
//! writes strings and slots, and only then publishes the range by advancing
//! `archived`. At rest the two counters are equal; observing
//! `archived < provisioned` at open means a prior append tore, and the open
//! fails with `Corruption` so an operator can repair the tail.
//!
//! Appends serialize their whole batch off the caller's thread budget:
//! every string field in the batch goes to the heap in one contiguous
//! append, and slot encoding fans out over scoped workers writing disjoint
//! chunks of a single buffer that lands in one store write.

pub(crate) mod codec;
mod dynamic;

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_stream::try_stream;
use fslock::LockFile;
use futures::Stream;
use parking_lot::Mutex;
use snafu::ResultExt;

use crate::{
    error::{IoSnafu, Result},
    heap::{StringHandle, StringHeap},
    schema::{FieldValue, Schema},
    stats::BucketUsage,
    store::{PagedFileStore, StoreConfig},
    Error,
};

pub use self::dynamic::DynamicRecordBucket;

/// Size of the reserved counter header in the structure file.
pub const BUCKET_HEADER_SIZE: u64 = 8;

/// Default page size for [`RecordBucket::as_enumerable`].
pub const DEFAULT_ENUMERATION_PAGE_SIZE: usize = 128;

/// Batches at or above this size encode/decode on scoped worker threads.
const PARALLEL_BATCH_MIN: usize = 64;

/// A record type with a compile-time schema.
///
/// `schema()` must return fields in sorted-by-name order (use
/// [`Schema::sorted_by_name`]); `to_values` and `from_values` exchange rows
/// in that same order.
pub trait Recordable: Clone + Send + Sync + Sized + 'static {
    fn schema() -> Schema;

    fn to_values(&self) -> Vec<FieldValue>;

    fn from_values(values: Vec<FieldValue>) -> Result<Self>;
}

/// Common surface of every bucket-shaped store.
///
/// [`RecordBucket`], [`DynamicRecordBucket`], and the write buffer all
/// expose this shape, which is what lets the write buffer wrap any of them.
pub trait RecordStore<R>: Send + Sync + 'static {
    /// Number of archived (readable) records.
    fn count(&self) -> usize;

    /// Appends a batch; the whole batch becomes readable atomically.
    fn add(&self, records: Vec<R>) -> Result<()>;

    /// Reads the record at `index`.
    fn read(&self, index: usize) -> Result<R>;

    /// Reads `count` records starting at `index`.
    fn read_bulk(&self, index: usize, count: usize) -> Result<Vec<R>>;

    /// Flushes all file contents to stable storage.
    fn sync(&self) -> Result<()>;

    /// Removes the dataset's files.
    fn delete(&self) -> Result<()>;

    /// Human-readable diagnostic counters.
    fn output_statistics(&self) -> String;
}

/// In-memory view of the two-counter header plus the bookkeeping that keeps
/// `archived` truthful under concurrent appends: completed ranges are staged
/// here and `archived` only advances across the contiguous completed
/// prefix, so it never covers a slot that is still being written.
#[derive(Debug)]
struct HeaderState {
    provisioned: u32,
    archived: u32,
    completed: BTreeMap<u32, u32>,
}

impl HeaderState {
    fn complete_range(&mut self, start: u32, end: u32) {
        self.completed.insert(start, end);
        while let Some(end) = self.completed.remove(&self.archived) {
            self.archived = end;
        }
    }
}

/// Schema-driven core shared by the typed and dynamic buckets.
#[derive(Debug)]
pub(crate) struct BucketCore {
    schema: Schema,
    store: PagedFileStore,
    heap: StringHeap,
    header: Mutex<HeaderState>,
    archived_mirror: AtomicUsize,
    usage: BucketUsage,
    structure_path: PathBuf,
    lock_path: PathBuf,
    // Held for the bucket's lifetime; prevents a second process from
    // opening the same file pair.
    #[allow(dead_code)]
    lock: LockFile,
}

impl BucketCore {
    pub(crate) fn open(
        schema: Schema,
        structure_path: &Path,
        string_path: &Path,
        config: StoreConfig,
    ) -> Result<Self> {
        let lock_path = structure_path.with_extension("lock");
        let mut lock = LockFile::open(&lock_path).context(IoSnafu {
            operation: "open dataset lock",
        })?;
        if !lock.try_lock().context(IoSnafu {
            operation: "acquire dataset lock",
        })? {
            return Err(Error::Io {
                operation: "acquire dataset lock",
                source: std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    format!("dataset '{}' is locked by another owner", structure_path.display()),
                ),
            });
        }

        let store = PagedFileStore::open(structure_path, config)?;
        let raw = store.read(0, BUCKET_HEADER_SIZE as usize)?;
        let provisioned = u32::from_le_bytes(raw[0..4].try_into().expect("4-byte counter"));
        let archived = u32::from_le_bytes(raw[4..8].try_into().expect("4-byte counter"));
        if archived > provisioned {
            return Err(Error::Corruption {
                reason: format!(
                    "archived count {archived} exceeds provisioned count {provisioned}"
                ),
            });
        }
        if archived < provisioned {
            return Err(Error::Corruption {
                reason: format!(
                    "torn append: {archived} archived of {provisioned} provisioned slots"
                ),
            });
        }

        let heap = StringHeap::open(string_path, config)?;
        debug!(
            path = %structure_path.display(),
            archived,
            "Opened record bucket."
        );

        Ok(Self {
            schema,
            store,
            heap,
            header: Mutex::new(HeaderState {
                provisioned,
                archived,
                completed: BTreeMap::new(),
            }),
            archived_mirror: AtomicUsize::new(archived as usize),
            usage: BucketUsage::default(),
            structure_path: structure_path.to_path_buf(),
            lock_path,
            lock,
        })
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn count(&self) -> usize {
        self.archived_mirror.load(Ordering::Acquire)
    }

    pub(crate) fn heap_end_cursor(&self) -> u64 {
        self.heap.end_cursor()
    }

    /// Appends a batch of rows using the provision/write/archive protocol.
    ///
    /// Rows are validated before any counter moves, so once a range is
    /// provisioned the only failure left is `Io`.
    pub(crate) fn add_rows(&self, rows: Vec<Vec<FieldValue>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for row in &rows {
            codec::validate_row(&self.schema, row)?;
        }
        let n = rows.len();

        // Step 1: claim the slot range and persist the widened header.
        let start = {
            let mut header = self.header.lock();
            let start = header.provisioned;
            header.provisioned += n as u32;
            self.persist_header(&header)?;
            start
        };

        // Step 2: one contiguous heap append for every string in the batch,
        // handles fanned back per record.
        let payloads: Vec<&[u8]> = rows
            .iter()
            .flat_map(|row| codec::string_payloads(&self.schema, row))
            .collect();
        let handles = self.heap.append_many(&payloads)?;

        // Step 3: encode all slots into one buffer, in parallel for large
        // batches; each worker owns a disjoint chunk.
        let slot_size = self.schema.slot_size();
        let mut buf = vec![0u8; n * slot_size];
        self.encode_batch(&rows, &handles, &mut buf)?;

        // Step 4: one write for the whole batch.
        self.store
            .write(BUCKET_HEADER_SIZE + u64::from(start) * slot_size as u64, &buf)?;

        // Step 5: publish. The range only becomes readable once every
        // earlier range has also completed.
        {
            let mut header = self.header.lock();
            header.complete_range(start, start + n as u32);
            self.persist_header(&header)?;
            self.archived_mirror
                .store(header.archived as usize, Ordering::Release);
        }
        self.usage.record_add(n as u64);

        Ok(())
    }

    pub(crate) fn read_rows(&self, index: usize, count: usize) -> Result<Vec<Vec<FieldValue>>> {
        let archived = self.count();
        if index + count > archived {
            return Err(Error::OutOfRange {
                index: index + count.saturating_sub(1),
                archived,
            });
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let slot_size = self.schema.slot_size();
        let bytes = self.store.read(
            BUCKET_HEADER_SIZE + index as u64 * slot_size as u64,
            count * slot_size,
        )?;
        let rows = self.decode_batch(&bytes, count)?;
        self.usage.record_reads(count as u64);

        Ok(rows)
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.heap.sync()?;
        self.store.sync()
    }

    pub(crate) fn delete(&self) -> Result<()> {
        self.store.delete()?;
        self.heap.delete()?;
        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(IoSnafu {
                operation: "delete dataset lock",
            }),
        }
    }

    pub(crate) fn output_statistics(&self) -> String {
        let (provisioned, archived) = {
            let header = self.header.lock();
            (header.provisioned, header.archived)
        };
        let usage = self.usage.snapshot();
        let store = self.store.usage();
        format!(
            "bucket {}: provisioned={provisioned} archived={archived} slot_size={} heap_end={}\n\
             activity: add_batches={} records_appended={} records_read={}\n\
             page cache: hits={} misses={} evictions={} bytes_read={} bytes_written={} growths={}",
            self.structure_path.display(),
            self.schema.slot_size(),
            self.heap.end_cursor(),
            usage.add_batches,
            usage.records_appended,
            usage.records_read,
            store.cache_hits,
            store.cache_misses,
            store.evictions,
            store.bytes_read,
            store.bytes_written,
            store.growths,
        )
    }

    fn persist_header(&self, header: &HeaderState) -> Result<()> {
        let mut raw = [0u8; BUCKET_HEADER_SIZE as usize];
        raw[0..4].copy_from_slice(&header.provisioned.to_le_bytes());
        raw[4..8].copy_from_slice(&header.archived.to_le_bytes());
        self.store.write(0, &raw)
    }

    fn encode_batch(
        &self,
        rows: &[Vec<FieldValue>],
        handles: &[StringHandle],
        buf: &mut [u8],
    ) -> Result<()> {
        let slot_size = self.schema.slot_size();
        let per_record = self.schema.string_field_count();
        let workers = worker_count(rows.len());
        if workers <= 1 {
            return encode_chunk(&self.schema, rows, handles, per_record, 0, buf);
        }

        let chunk_rows = rows.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let mut joins = Vec::with_capacity(workers);
            for (chunk_index, (row_chunk, buf_chunk)) in rows
                .chunks(chunk_rows)
                .zip(buf.chunks_mut(chunk_rows * slot_size))
                .enumerate()
            {
                let schema = &self.schema;
                joins.push(scope.spawn(move || {
                    encode_chunk(
                        schema,
                        row_chunk,
                        handles,
                        per_record,
                        chunk_index * chunk_rows,
                        buf_chunk,
                    )
                }));
            }
            for join in joins {
                join.join().expect("encode worker should not panic")?;
            }
            Ok(())
        })
    }

    fn decode_batch(&self, bytes: &[u8], count: usize) -> Result<Vec<Vec<FieldValue>>> {
        let slot_size = self.schema.slot_size();
        let workers = worker_count(count);
        if workers <= 1 {
            return decode_chunk(&self.schema, &self.heap, bytes, slot_size);
        }

        let chunk_rows = count.div_ceil(workers);
        std::thread::scope(|scope| {
            let mut joins = Vec::with_capacity(workers);
            for slot_chunk in bytes.chunks(chunk_rows * slot_size) {
                let schema = &self.schema;
                let heap = &self.heap;
                joins.push(scope.spawn(move || decode_chunk(schema, heap, slot_chunk, slot_size)));
            }
            let mut rows = Vec::with_capacity(count);
            for join in joins {
                rows.extend(join.join().expect("decode worker should not panic")?);
            }
            Ok(rows)
        })
    }
}

fn worker_count(batch: usize) -> usize {
    if batch < PARALLEL_BATCH_MIN {
        return 1;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(batch)
}

fn encode_chunk(
    schema: &Schema,
    rows: &[Vec<FieldValue>],
    all_handles: &[StringHandle],
    handles_per_record: usize,
    first_row: usize,
    buf: &mut [u8],
) -> Result<()> {
    let slot_size = schema.slot_size();
    for (i, (row, slot)) in rows.iter().zip(buf.chunks_mut(slot_size)).enumerate() {
        let handle_start = (first_row + i) * handles_per_record;
        let handles = &all_handles[handle_start..handle_start + handles_per_record];
        codec::encode_slot(schema, row, handles, slot)?;
    }
    Ok(())
}

fn decode_chunk(
    schema: &Schema,
    heap: &StringHeap,
    bytes: &[u8],
    slot_size: usize,
) -> Result<Vec<Vec<FieldValue>>> {
    bytes
        .chunks(slot_size)
        .map(|slot| codec::decode_slot(schema, slot, heap))
        .collect()
}

/// Append-only bucket for a record type with a compile-time schema.
#[derive(Debug)]
pub struct RecordBucket<R: Recordable> {
    core: BucketCore,
    _r: PhantomData<R>,
}

impl<R: Recordable> RecordBucket<R> {
    /// Opens (or creates) the bucket backed by the given file pair.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` when the structure file records a torn append
    /// (`archived < provisioned`) and `Io` for file or lock failures.
    pub fn open(structure_path: &Path, string_path: &Path, config: StoreConfig) -> Result<Self> {
        Ok(Self {
            core: BucketCore::open(R::schema(), structure_path, string_path, config)?,
            _r: PhantomData,
        })
    }

    /// The bucket's frozen schema.
    pub fn schema(&self) -> &Schema {
        self.core.schema()
    }

    /// Current end of the string heap, in bytes.
    pub fn heap_end_cursor(&self) -> u64 {
        self.core.heap_end_cursor()
    }

    /// Lazily yields every archived record in index order, reading
    /// `page_size` records per underlying bulk read. The sequence is finite
    /// and not restartable.
    pub fn as_enumerable(&self, page_size: usize) -> impl Stream<Item = Result<R>> + '_ {
        try_stream! {
            let total = self.count();
            let page = page_size.max(1);
            let mut index = 0;
            while index < total {
                let span = page.min(total - index);
                let records = self.read_bulk(index, span)?;
                for record in records {
                    yield record;
                }
                index += span;
            }
        }
    }
}

impl<R: Recordable> RecordStore<R> for RecordBucket<R> {
    fn count(&self) -> usize {
        self.core.count()
    }

    fn add(&self, records: Vec<R>) -> Result<()> {
        let rows = records.iter().map(Recordable::to_values).collect();
        self.core.add_rows(rows)
    }

    fn read(&self, index: usize) -> Result<R> {
        let mut rows = self.core.read_rows(index, 1)?;
        R::from_values(rows.pop().expect("read_rows returned one row"))
    }

    fn read_bulk(&self, index: usize, count: usize) -> Result<Vec<R>> {
        self.core
            .read_rows(index, count)?
            .into_iter()
            .map(R::from_values)
            .collect()
    }

    fn sync(&self) -> Result<()> {
        self.core.sync()
    }

    fn delete(&self) -> Result<()> {
        self.core.delete()
    }

    fn output_statistics(&self) -> String {
        self.core.output_statistics()
    }
}
