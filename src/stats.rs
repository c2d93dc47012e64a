//! Usage counters for the store, bucket, and write buffer.
//!
//! These back `output_statistics()` only; the core never emits them on its
//! own. Counters are grouped per component, incremented with relaxed
//! atomics, and read out as point-in-time snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Page-cache and file activity for one [`PagedFileStore`](crate::PagedFileStore).
#[derive(Debug, Default)]
pub(crate) struct StoreUsage {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    growths: AtomicU64,
}

impl StoreUsage {
    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_growth(&self) {
        self.growths.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreUsageSnapshot {
        StoreUsageSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            growths: self.growths.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`StoreUsage`] counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreUsageSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub growths: u64,
}

/// Append/read activity for one bucket.
#[derive(Debug, Default)]
pub(crate) struct BucketUsage {
    add_batches: AtomicU64,
    records_appended: AtomicU64,
    records_read: AtomicU64,
}

impl BucketUsage {
    pub fn record_add(&self, records: u64) {
        self.add_batches.fetch_add(1, Ordering::Relaxed);
        self.records_appended.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_reads(&self, records: u64) {
        self.records_read.fetch_add(records, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BucketUsageSnapshot {
        BucketUsageSnapshot {
            add_batches: self.add_batches.load(Ordering::Relaxed),
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`BucketUsage`] counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketUsageSnapshot {
    pub add_batches: u64,
    pub records_appended: u64,
    pub records_read: u64,
}

/// Producer/flusher activity for one write buffer.
#[derive(Debug, Default)]
pub(crate) struct BufferUsage {
    add_calls: AtomicU64,
    records_enqueued: AtomicU64,
    flush_batches: AtomicU64,
    records_flushed: AtomicU64,
    cooldown_events: AtomicU64,
    largest_batch: AtomicU64,
}

impl BufferUsage {
    pub fn record_enqueue(&self, records: u64) {
        self.add_calls.fetch_add(1, Ordering::Relaxed);
        self.records_enqueued.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_flush(&self, records: u64) {
        self.flush_batches.fetch_add(1, Ordering::Relaxed);
        self.records_flushed.fetch_add(records, Ordering::Relaxed);
        self.largest_batch.fetch_max(records, Ordering::Relaxed);
    }

    pub fn record_cooldown(&self) {
        self.cooldown_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BufferUsageSnapshot {
        BufferUsageSnapshot {
            add_calls: self.add_calls.load(Ordering::Relaxed),
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            flush_batches: self.flush_batches.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            cooldown_events: self.cooldown_events.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`BufferUsage`] counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferUsageSnapshot {
    pub add_calls: u64,
    pub records_enqueued: u64,
    pub flush_batches: u64,
    pub records_flushed: u64,
    pub cooldown_events: u64,
    pub largest_batch: u64,
}
