//! Append-only UTF-8 string heap.
//!
//! The heap is a byte arena inside a [`PagedFileStore`]: bytes 0..8 hold the
//! little-endian end cursor, payloads are appended from offset 8 onward, and
//! nothing is ever rewritten or freed. `append_many` reserves space for a
//! whole batch under the heap mutex, then writes the concatenated payload as
//! one contiguous region outside it. A crash between the payload write and
//! the cursor write is benign: the persisted cursor is then ≤ the true end,
//! and the orphaned tail bytes are unreferenced.

use std::path::Path;

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    store::{PagedFileStore, StoreConfig},
    Error,
};

/// Size of the reserved cursor region at the head of the heap file.
pub const HEAP_HEADER_SIZE: u64 = 8;

/// Reference to one payload in the heap.
///
/// `(-1, 0)` is the empty handle: it denotes an empty (or null) string and
/// points at nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringHandle {
    pub offset: i64,
    pub len: i32,
}

impl StringHandle {
    /// The handle for an empty or null string.
    pub const EMPTY: StringHandle = StringHandle { offset: -1, len: 0 };

    /// Whether this handle points at nothing.
    pub fn is_empty(&self) -> bool {
        self.offset < 0 || self.len == 0
    }
}

#[derive(Debug)]
struct Cursor {
    /// Next free byte; reservations advance this.
    reserved: u64,
    /// Highest end value persisted at offset 0. Never regresses, so a slow
    /// earlier batch cannot shrink the on-disk cursor below a later one.
    persisted: u64,
}

/// Append-only byte arena with a persisted end cursor.
#[derive(Debug)]
pub struct StringHeap {
    store: PagedFileStore,
    cursor: Mutex<Cursor>,
}

impl StringHeap {
    /// Opens the heap at `path`, initializing the cursor to 8 on first use.
    ///
    /// # Errors
    ///
    /// Returns `Io` on file failures and `Corruption` when an existing file
    /// carries a cursor below the header size.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let store = PagedFileStore::open(path, config)?;

        let raw = store.read(0, HEAP_HEADER_SIZE as usize)?;
        let mut end = u64::from_le_bytes(raw.try_into().expect("read returned 8 bytes"));
        if end == 0 {
            end = HEAP_HEADER_SIZE;
            store.write(0, &end.to_le_bytes())?;
        } else if end < HEAP_HEADER_SIZE {
            return Err(Error::Corruption {
                reason: format!("string heap cursor {end} is below the header size"),
            });
        }

        Ok(Self {
            store,
            cursor: Mutex::new(Cursor {
                reserved: end,
                persisted: end,
            }),
        })
    }

    /// Appends every payload as one contiguous region and returns a handle
    /// per payload, in order. Empty payloads consume no heap space and map
    /// to [`StringHandle::EMPTY`].
    ///
    /// # Errors
    ///
    /// Returns `Io` if the payload or cursor write fails.
    pub fn append_many(&self, payloads: &[&[u8]]) -> Result<Vec<StringHandle>> {
        let total: u64 = payloads.iter().map(|p| p.len() as u64).sum();
        if total == 0 {
            return Ok(vec![StringHandle::EMPTY; payloads.len()]);
        }

        let start = {
            let mut cursor = self.cursor.lock();
            let start = cursor.reserved;
            cursor.reserved += total;
            start
        };

        let mut handles = Vec::with_capacity(payloads.len());
        let mut buf = BytesMut::with_capacity(total as usize);
        let mut at = start;
        for payload in payloads {
            if payload.is_empty() {
                handles.push(StringHandle::EMPTY);
            } else {
                handles.push(StringHandle {
                    offset: at as i64,
                    len: payload.len() as i32,
                });
                buf.put_slice(payload);
                at += payload.len() as u64;
            }
        }

        self.store.write(start, &buf)?;
        self.persist_cursor(start + total)?;

        Ok(handles)
    }

    /// Loads the payload behind `handle` and decodes it as UTF-8. The empty
    /// handle yields `""`.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` when the bytes are not valid UTF-8 or the handle
    /// lies outside the reserved region, and `Io` on file failures.
    pub fn load(&self, handle: StringHandle) -> Result<String> {
        if handle.is_empty() {
            return Ok(String::new());
        }

        let end = self.end_cursor();
        let offset = handle.offset as u64;
        let len = handle.len as u64;
        if handle.offset < HEAP_HEADER_SIZE as i64 || offset + len > end {
            return Err(Error::Corruption {
                reason: format!(
                    "string handle ({}, {}) lies outside the heap (end cursor {end})",
                    handle.offset, handle.len
                ),
            });
        }

        let bytes = self.store.read(offset, handle.len as usize)?;
        String::from_utf8(bytes).map_err(|e| Error::Corruption {
            reason: format!("invalid UTF-8 at heap offset {}: {e}", handle.offset),
        })
    }

    /// Current reserved end of the heap, in bytes.
    pub fn end_cursor(&self) -> u64 {
        self.cursor.lock().reserved
    }

    /// Flushes heap contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Removes the heap file.
    pub fn delete(&self) -> Result<()> {
        self.store.delete()
    }

    /// Persists `end` at offset 0 unless a later batch already pushed the
    /// on-disk cursor further.
    fn persist_cursor(&self, end: u64) -> Result<()> {
        let mut cursor = self.cursor.lock();
        if end > cursor.persisted {
            self.store.write(0, &end.to_le_bytes())?;
            cursor.persisted = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use temp_dir::TempDir;

    use super::*;

    fn small_config() -> StoreConfig {
        StoreConfig {
            initial_size: 128,
            page_size: 64,
            max_resident_pages: 8,
            hot_tail_count: 2,
        }
    }

    #[test]
    fn fresh_heap_cursor_starts_at_header() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let heap = StringHeap::open(dir.path().join("s_string.dat"), small_config())
            .expect("open should not fail");
        assert_eq!(heap.end_cursor(), 8);
    }

    #[test]
    fn append_many_is_contiguous() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let heap = StringHeap::open(dir.path().join("s_string.dat"), small_config())
            .expect("open should not fail");

        let handles = heap
            .append_many(&[b"hello", b"", b"world"])
            .expect("append should not fail");
        assert_eq!(
            handles,
            vec![
                StringHandle { offset: 8, len: 5 },
                StringHandle::EMPTY,
                StringHandle { offset: 13, len: 5 },
            ]
        );
        assert_eq!(heap.end_cursor(), 18);

        assert_eq!(heap.load(handles[0]).expect("load"), "hello");
        assert_eq!(heap.load(handles[1]).expect("load"), "");
        assert_eq!(heap.load(handles[2]).expect("load"), "world");
    }

    #[test]
    fn cursor_survives_reopen() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let path = dir.path().join("s_string.dat");

        let handle = {
            let heap = StringHeap::open(&path, small_config()).expect("open should not fail");
            heap.append_many(&[b"durable"]).expect("append")[0]
        };

        let heap = StringHeap::open(&path, small_config()).expect("reopen should not fail");
        assert_eq!(heap.end_cursor(), 8 + 7);
        assert_eq!(heap.load(handle).expect("load"), "durable");
    }

    #[test]
    fn invalid_utf8_is_corruption() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let heap = StringHeap::open(dir.path().join("s_string.dat"), small_config())
            .expect("open should not fail");

        let handle = heap.append_many(&[&[0xff, 0xfe][..]]).expect("append")[0];
        let err = heap.load(handle).expect_err("load should fail");
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[test]
    fn out_of_bounds_handle_is_corruption() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let heap = StringHeap::open(dir.path().join("s_string.dat"), small_config())
            .expect("open should not fail");

        let err = heap
            .load(StringHandle {
                offset: 1024,
                len: 4,
            })
            .expect_err("load should fail");
        assert!(matches!(err, Error::Corruption { .. }));
    }
}
