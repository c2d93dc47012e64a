//! Paged random-access file store.
//!
//! A [`PagedFileStore`] serves arbitrary `read(offset, len)` / `write(offset,
//! bytes)` requests against a single growable file through a fixed-size page
//! cache. Pages are plain `page_size`-byte buffers keyed by
//! `offset / page_size`; an LRU list evicts the oldest resident page at
//! capacity, except that the most recent `hot_tail_count` entries are pinned
//! in position so sequential tail appends do not churn the list.
//!
//! The underlying file handle is re-opened per operation with OS read
//! sharing, which keeps the store portable across sharing models. A single
//! coarse mutex guards the cache map, the LRU list, and the known file
//! length; growth happens under that same lock before any I/O touches the
//! new range.

use std::{
    collections::{HashMap, VecDeque},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use snafu::ResultExt;

use crate::{
    error::{IoSnafu, Result},
    stats::{StoreUsage, StoreUsageSnapshot},
};

/// Default initial physical size of a data file: 16 MiB.
pub const DEFAULT_INITIAL_SIZE: u64 = 16 * 1024 * 1024;

/// Default page-cache page size: 16 MiB.
pub const DEFAULT_PAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Default maximum number of resident pages.
pub const DEFAULT_MAX_RESIDENT_PAGES: usize = 64;

/// Default number of hot-tail pages pinned against LRU promotion.
pub const DEFAULT_HOT_TAIL_COUNT: usize = 8;

const ZERO_FILL_CHUNK: usize = 1024 * 1024;

/// Page-cache tuning for one file.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Physical size a freshly created file is zero-filled to.
    ///
    /// Zero-filling up front lets the filesystem allocate contiguous
    /// extents, which measurably helps sequential throughput on rotating
    /// media and keeps COW filesystems from fragmenting the tail.
    pub initial_size: u64,
    /// Size of one cached page, in bytes.
    pub page_size: u64,
    /// Maximum number of pages resident at once.
    pub max_resident_pages: usize,
    /// Number of most-recent pages pinned in LRU position.
    pub hot_tail_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            max_resident_pages: DEFAULT_MAX_RESIDENT_PAGES,
            hot_tail_count: DEFAULT_HOT_TAIL_COUNT,
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_size == 0 || self.page_size == 0 || self.max_resident_pages == 0 {
            return Err(crate::Error::Io {
                operation: "configure store",
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "initial_size, page_size, and max_resident_pages must be non-zero",
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct StoreInner {
    /// Known physical length of the file.
    file_len: u64,
    /// Resident pages keyed by page index.
    pages: HashMap<u64, Vec<u8>>,
    /// Page indexes in recency order, oldest first.
    lru: VecDeque<u64>,
}

/// Random read/write over a growable file, through an LRU page cache.
#[derive(Debug)]
pub struct PagedFileStore {
    path: PathBuf,
    page_size: u64,
    max_resident_pages: usize,
    hot_tail_count: usize,
    inner: Mutex<StoreInner>,
    usage: StoreUsage,
}

impl PagedFileStore {
    /// Opens the file at `path`, creating and zero-filling it to
    /// `config.initial_size` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the path cannot be created or the existing file
    /// cannot be inspected.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let file_len = match std::fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)
                    .context(IoSnafu {
                        operation: "create data file",
                    })?;
                zero_fill(&file, 0, config.initial_size)?;
                file.sync_all().context(IoSnafu {
                    operation: "sync new data file",
                })?;
                config.initial_size
            }
            Err(e) => {
                return Err(e).context(IoSnafu {
                    operation: "stat data file",
                })
            }
        };

        Ok(Self {
            path,
            page_size: config.page_size,
            max_resident_pages: config.max_resident_pages,
            hot_tail_count: config.hot_tail_count,
            inner: Mutex::new(StoreInner {
                file_len,
                pages: HashMap::new(),
                lru: VecDeque::new(),
            }),
            usage: StoreUsage::default(),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads `len` bytes starting at `offset`.
    ///
    /// The requested range is assembled from cached pages, loading missing
    /// pages on demand. A range beyond the current physical length grows the
    /// file first, so the bytes returned for never-written regions are
    /// zeros.
    ///
    /// # Errors
    ///
    /// Returns `Io` on any underlying file failure, including a short read.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        if len == 0 {
            return Ok(out);
        }

        let mut inner = self.inner.lock();
        self.ensure_length(&mut inner, offset + len as u64)?;

        let first_page = offset / self.page_size;
        let last_page = (offset + len as u64 - 1) / self.page_size;
        let mut copied = 0usize;
        for page_index in first_page..=last_page {
            self.touch_page(&mut inner, page_index)?;
            let page = &inner.pages[&page_index];
            let page_start = page_index * self.page_size;
            let from = offset.max(page_start) - page_start;
            let until = ((offset + len as u64).min(page_start + self.page_size)) - page_start;
            let span = (until - from) as usize;
            out[copied..copied + span].copy_from_slice(&page[from as usize..until as usize]);
            copied += span;
        }
        self.usage.record_read(len as u64);

        Ok(out)
    }

    /// Writes `data` at `offset`, growing the file if the range extends past
    /// its current physical length.
    ///
    /// Every cached page the written range touches is invalidated before the
    /// underlying write is issued.
    ///
    /// # Errors
    ///
    /// Returns `Io` on any underlying file failure; growth past available
    /// storage surfaces here as well.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        self.ensure_length(&mut inner, offset + data.len() as u64)?;

        let first_page = offset / self.page_size;
        let last_page = (offset + data.len() as u64 - 1) / self.page_size;
        for page_index in first_page..=last_page {
            if inner.pages.remove(&page_index).is_some() {
                inner.lru.retain(|candidate| *candidate != page_index);
            }
        }

        let mut file = self.open_handle(false)?;
        file.seek(SeekFrom::Start(offset)).context(IoSnafu {
            operation: "seek for write",
        })?;
        file.write_all(data).context(IoSnafu {
            operation: "write data",
        })?;
        self.usage.record_write(data.len() as u64);

        Ok(())
    }

    /// Flushes file contents and metadata to stable storage.
    pub fn sync(&self) -> Result<()> {
        let file = self.open_handle(false)?;
        file.sync_all().context(IoSnafu {
            operation: "sync data file",
        })
    }

    /// Removes the underlying file and drops every cached page.
    pub fn delete(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pages.clear();
        inner.lru.clear();
        inner.file_len = 0;
        std::fs::remove_file(&self.path).context(IoSnafu {
            operation: "delete data file",
        })
    }

    /// Point-in-time cache and throughput counters.
    pub fn usage(&self) -> StoreUsageSnapshot {
        self.usage.snapshot()
    }

    /// Grows the file by doubling until it covers `required`, zero-filling
    /// the appended region. No-op when already long enough.
    fn ensure_length(&self, inner: &mut StoreInner, required: u64) -> Result<()> {
        if required <= inner.file_len {
            return Ok(());
        }

        let mut new_len = inner.file_len.max(1);
        while new_len < required {
            new_len *= 2;
        }
        trace!(
            old_len = inner.file_len,
            new_len,
            "Growing data file."
        );

        let file = self.open_handle(false)?;
        zero_fill(&file, inner.file_len, new_len)?;
        inner.file_len = new_len;
        self.usage.record_growth();

        Ok(())
    }

    /// Makes `page_index` resident and updates its recency, pinning entries
    /// already inside the hot tail.
    fn touch_page(&self, inner: &mut StoreInner, page_index: u64) -> Result<()> {
        if inner.pages.contains_key(&page_index) {
            self.usage.record_hit();
            // Walk backward from the tail at most `hot_tail_count` links; a
            // page already in the hot tail keeps its position.
            let in_hot_tail = inner
                .lru
                .iter()
                .rev()
                .take(self.hot_tail_count)
                .any(|candidate| *candidate == page_index);
            if !in_hot_tail {
                inner.lru.retain(|candidate| *candidate != page_index);
                inner.lru.push_back(page_index);
            }
            return Ok(());
        }

        self.usage.record_miss();
        if inner.pages.len() >= self.max_resident_pages {
            if let Some(oldest) = inner.lru.pop_front() {
                inner.pages.remove(&oldest);
                self.usage.record_eviction();
                trace!(page_index = oldest, "Evicted page.");
            }
        }

        let page = self.load_page(page_index, inner.file_len)?;
        inner.pages.insert(page_index, page);
        inner.lru.push_back(page_index);

        Ok(())
    }

    /// Reads one page from disk. The portion of the page past the physical
    /// end of file stays zeroed.
    fn load_page(&self, page_index: u64, file_len: u64) -> Result<Vec<u8>> {
        let mut page = vec![0u8; self.page_size as usize];
        let page_start = page_index * self.page_size;
        if page_start >= file_len {
            return Ok(page);
        }

        let readable = ((file_len - page_start).min(self.page_size)) as usize;
        let mut file = self.open_handle(true)?;
        file.seek(SeekFrom::Start(page_start)).context(IoSnafu {
            operation: "seek for page load",
        })?;
        file.read_exact(&mut page[..readable]).context(IoSnafu {
            operation: "load page",
        })?;

        Ok(page)
    }

    fn open_handle(&self, read_only: bool) -> Result<File> {
        let mut options = OpenOptions::new();
        options.read(true);
        if !read_only {
            options.write(true);
        }
        options.open(&self.path).context(IoSnafu {
            operation: "open data file",
        })
    }
}

fn zero_fill(mut file: &File, from: u64, until: u64) -> Result<()> {
    file.seek(SeekFrom::Start(from)).context(IoSnafu {
        operation: "seek for zero fill",
    })?;
    let zeros = [0u8; ZERO_FILL_CHUNK];
    let mut remaining = until - from;
    while remaining > 0 {
        let span = remaining.min(ZERO_FILL_CHUNK as u64) as usize;
        file.write_all(&zeros[..span]).context(IoSnafu {
            operation: "zero fill",
        })?;
        remaining -= span as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use temp_dir::TempDir;

    use super::*;

    fn small_config() -> StoreConfig {
        StoreConfig {
            initial_size: 256,
            page_size: 64,
            max_resident_pages: 4,
            hot_tail_count: 2,
        }
    }

    #[test]
    fn creates_zero_filled_file() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let path = dir.path().join("fresh.dat");

        let store = PagedFileStore::open(&path, small_config()).expect("open should not fail");
        assert_eq!(std::fs::metadata(&path).expect("file exists").len(), 256);

        let bytes = store.read(0, 256).expect("read should not fail");
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn round_trips_across_page_boundaries() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let store = PagedFileStore::open(dir.path().join("span.dat"), small_config())
            .expect("open should not fail");

        // 100 bytes starting at 30 spans pages 0..=2 with a 64-byte page.
        let payload: Vec<u8> = (0..100).map(|i| i as u8).collect();
        store.write(30, &payload).expect("write should not fail");
        assert_eq!(store.read(30, 100).expect("read should not fail"), payload);
    }

    #[test]
    fn grows_by_doubling_and_reads_zeros() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let path = dir.path().join("grow.dat");
        let store = PagedFileStore::open(&path, small_config()).expect("open should not fail");

        store.write(1000, &[7u8; 8]).expect("write should not fail");
        // 256 doubles to 512, then 1024, then 2048 to cover offset 1008.
        assert_eq!(std::fs::metadata(&path).expect("file exists").len(), 2048);

        let tail = store.read(900, 100).expect("read should not fail");
        assert!(tail.iter().all(|b| *b == 0));
        assert_eq!(store.read(1000, 8).expect("read should not fail"), [7u8; 8]);
        assert_eq!(store.usage().growths, 1);
    }

    #[test]
    fn write_invalidates_cached_pages() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let store = PagedFileStore::open(dir.path().join("inval.dat"), small_config())
            .expect("open should not fail");

        assert!(store.read(0, 16).expect("read").iter().all(|b| *b == 0));
        store.write(4, &[9u8; 4]).expect("write should not fail");

        let reread = store.read(0, 16).expect("read should not fail");
        assert_eq!(&reread[4..8], &[9u8; 4]);
        assert!(reread[..4].iter().all(|b| *b == 0));
    }

    #[test]
    fn evicts_oldest_page_at_capacity() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let config = StoreConfig {
            hot_tail_count: 0,
            ..small_config()
        };
        let store =
            PagedFileStore::open(dir.path().join("evict.dat"), config).expect("open should not fail");

        // Touch five distinct pages with a four-page cache.
        for page in 0..5u64 {
            store.read(page * 64, 1).expect("read should not fail");
        }

        let usage = store.usage();
        assert_eq!(usage.cache_misses, 5);
        assert_eq!(usage.evictions, 1);

        // Page 0 was evicted; reading it again is another miss.
        store.read(0, 1).expect("read should not fail");
        assert_eq!(store.usage().cache_misses, 6);
    }

    #[test]
    fn hot_tail_hit_keeps_position() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let store = PagedFileStore::open(dir.path().join("hot.dat"), small_config())
            .expect("open should not fail");

        // Residency order: 0, 1, 2, 3. Pages 2 and 3 form the hot tail.
        for page in 0..4u64 {
            store.read(page * 64, 1).expect("read should not fail");
        }

        // A hit inside the hot tail must not promote, so page 0 is still the
        // eviction victim when page 4 faults in.
        store.read(2 * 64, 1).expect("read should not fail");
        store.read(4 * 64, 1).expect("read should not fail");
        store.read(0, 1).expect("read should not fail");

        // 4 initial misses + page 4 fault + page 0 refault.
        assert_eq!(store.usage().cache_misses, 6);
    }

    #[test]
    fn lru_hit_outside_hot_tail_promotes() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let store = PagedFileStore::open(dir.path().join("promote.dat"), small_config())
            .expect("open should not fail");

        for page in 0..4u64 {
            store.read(page * 64, 1).expect("read should not fail");
        }

        // Page 0 is outside the two-entry hot tail; hitting it moves it to
        // the tail, so page 1 becomes the victim for the next fault.
        store.read(0, 1).expect("read should not fail");
        store.read(4 * 64, 1).expect("read should not fail");

        let misses_before = store.usage().cache_misses;
        store.read(0, 1).expect("read should not fail");
        assert_eq!(store.usage().cache_misses, misses_before);

        store.read(64, 1).expect("read should not fail");
        assert_eq!(store.usage().cache_misses, misses_before + 1);
    }

    #[test]
    fn delete_removes_file() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let path = dir.path().join("gone.dat");
        let store = PagedFileStore::open(&path, small_config()).expect("open should not fail");

        store.delete().expect("delete should not fail");
        assert!(!path.exists());
    }
}
