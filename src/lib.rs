//! # Granary: embedded append-only record storage.
//!
//! Granary stores collections of fixed-schema records — primitives plus
//! variable-length UTF-8 strings — at computable file offsets, giving O(1)
//! indexed reads and high sustained append throughput. It is embedded and
//! single-process: one process owns each dataset's files for its lifetime.
//!
//! ## Design constraints
//!
//! These invariants keep the design simple and recoverable:
//! - records are append-only; nothing is mutated, deleted, or compacted
//! - every record of a dataset has the same fixed-width slot layout, frozen
//!   at first write
//! - string payloads live in a separate append-only heap and are referenced
//!   by `(offset, length)` handles inside the slot
//! - all on-disk integers are little-endian, so files are portable across
//!   hosts
//! - a dataset at rest always has `archived == provisioned`; anything else
//!   at open time is corruption
//!
//! ## On-disk layout
//!
//! Each dataset is a file pair:
//!
//!   `<name>_structure.dat`:
//!     `provisioned`: uint32    slots reserved by writers
//!     `archived`:    uint32    slots durably written and readable
//!     `slots`:       uint8[]   packed fixed-width records from byte 8
//!
//!   `<name>_string.dat`:
//!     `end_cursor`:  uint64    first free heap byte, at least 8
//!     `payloads`:    uint8[]   concatenated UTF-8 strings from byte 8
//!
//! Record `i` starts at `8 + slot_size * i`. A string field occupies 12
//! slot bytes: an i64 heap offset and an i32 length, with `(-1, 0)`
//! denoting the empty string.
//!
//! ## Writing records
//!
//! An append provisions its slot range first (persisting the widened
//! `provisioned` counter), then appends every string of the batch to the
//! heap in one contiguous write, encodes all slots into one buffer — in
//! parallel for large batches — writes that buffer in one call, and only
//! then advances `archived`. A crash in between leaves
//! `archived < provisioned`, which the next open reports as a torn append
//! instead of silently serving half-written slots.
//!
//! ## Layers
//!
//! - [`PagedFileStore`]: random access over a growable zero-filled file
//!   through an LRU page cache with hot-tail pinning.
//! - [`StringHeap`]: the append-only UTF-8 arena.
//! - [`RecordBucket`] / [`DynamicRecordBucket`]: typed and
//!   runtime-described record codecs over a slot file.
//! - [`WriteBuffer`]: double-buffered asynchronous flushing with an
//!   adaptive cooldown between bursts.
//! - [`Partitioner`]: fans records out to per-key buffer/bucket pairs
//!   inside one directory.

#[macro_use]
extern crate tracing;

mod error;
mod heap;
mod stats;
mod store;

pub mod bucket;
pub mod partition;
pub mod schema;
pub mod write_buffer;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::{
    bucket::{
        DynamicRecordBucket, RecordBucket, RecordStore, Recordable, BUCKET_HEADER_SIZE,
        DEFAULT_ENUMERATION_PAGE_SIZE,
    },
    error::{Error, Result},
    heap::{StringHandle, StringHeap, HEAP_HEADER_SIZE},
    partition::{PartitionKey, Partitioned, Partitioner, PartitionerConfig},
    schema::{
        DynamicRecord, FieldDef, FieldKind, FieldType, FieldValue, Schema, SchemaDescriptor,
    },
    stats::{BucketUsageSnapshot, BufferUsageSnapshot, StoreUsageSnapshot},
    store::{PagedFileStore, StoreConfig},
    write_buffer::{EngineState, WriteBuffer, WriteBufferConfig},
};
