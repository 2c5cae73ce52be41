#![allow(unsafe_code)]
//! Fixed-capacity circular buffer of length-prefixed records.
//!
//! The buffer lives entirely inside a [`Region`]: the two cursors are stored in the
//! region's header (see [`layout`]) rather than in program memory, so a reader in a
//! different process sees every committed write by polling the same bytes.
//!
//! # Roles
//!
//! - **Writer**: calls [`RecordBuffer::put`]. Exactly one thread should hold this role;
//!   [`WriteCoordinator`](crate::coordinator::WriteCoordinator) provides that thread.
//! - **Reader**: calls [`RecordBuffer::get`] (or walks the region with a
//!   [`ReferenceReader`](crate::reader::ReferenceReader)). Exactly one reader, possibly
//!   in another process.
//!
//! Each role has its own uncontended lock. The writer never takes the reader's lock and
//! vice versa; the two roles synchronise only through the cursor words, using
//! Release stores after copying bytes and Acquire loads before touching them.
//!
//! # Full vs. empty
//!
//! `read_index == write_index` always means "empty". A record is accepted only if it
//! leaves at least one byte free afterwards, so the write cursor can never catch up
//! with the read cursor.

pub mod layout;
pub mod region;

use crate::error::{RingError, RingResult};
use crate::reader;
use layout::{
    free_space, HeaderSnapshot, RegionView, HEADER_SIZE, LEN_PREFIX_SIZE, MAX_LOCAL_CAPACITY,
    MAX_RECORD_LEN, MAX_SHARED_CAPACITY, MIN_CAPACITY, REGION_ALIGN,
};
use parking_lot::{Mutex, MutexGuard};
use region::{HeapRegion, MappedRegion, Region};
use std::path::Path;

/// Circular buffer for variable-sized binary records.
pub struct RecordBuffer {
    // Owns the memory `view` points into.
    region: Box<dyn Region>,
    view: RegionView,
    writer: Mutex<()>,
    reader: Mutex<()>,
}

impl std::fmt::Debug for RecordBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBuffer")
            .field("region", &self.region.describe())
            .field("capacity", &self.capacity())
            .field("read_index", &self.read_index())
            .field("write_index", &self.write_index())
            .finish()
    }
}

// SAFETY: the region is Send + Sync and owned by the buffer. Payload bytes are only
// written in the free part of the ring (writer role) and only read in the unread part
// (reader role); the cursor atomics publish ownership of those ranges between roles.
unsafe impl Send for RecordBuffer {}
unsafe impl Sync for RecordBuffer {}

impl RecordBuffer {
    /// Create a process-local buffer with `capacity` payload bytes.
    ///
    /// # Example
    /// ```
    /// use exceptional::buffer::RecordBuffer;
    ///
    /// let buffer = RecordBuffer::with_capacity(64).unwrap();
    /// assert!(buffer.put(b"hello"));
    /// assert_eq!(buffer.get().as_deref(), Some(&b"hello"[..]));
    /// assert_eq!(buffer.get(), None);
    /// ```
    pub fn with_capacity(capacity: usize) -> RingResult<Self> {
        if !(MIN_CAPACITY..=MAX_LOCAL_CAPACITY).contains(&capacity) {
            return Err(RingError::InvalidCapacity {
                capacity,
                min: MIN_CAPACITY,
                max: MAX_LOCAL_CAPACITY,
            });
        }
        Self::from_region(HeapRegion::new(HEADER_SIZE + capacity))
    }

    /// Create a buffer in a freshly initialised shared file at `path`.
    ///
    /// Another process can map the same file and consume records with the algorithm
    /// described in [`layout`]. `capacity` must not exceed
    /// [`MAX_SHARED_CAPACITY`].
    pub fn create_shared(path: &Path, capacity: usize) -> RingResult<Self> {
        Self::from_region(MappedRegion::create(path, capacity)?)
    }

    /// Attach to an existing shared file, keeping its cursors.
    pub fn open_shared(path: &Path) -> RingResult<Self> {
        Self::from_region(MappedRegion::open(path)?)
    }

    /// Build a buffer on top of an arbitrary region, adopting its current cursors.
    ///
    /// Fails if the region is too small, misaligned, or its cursors are out of range.
    pub fn from_region<R: Region + 'static>(region: R) -> RingResult<Self> {
        let base = region.base();
        if base.as_ptr() as usize % REGION_ALIGN != 0 {
            return Err(RingError::Misaligned {
                addr: base.as_ptr() as usize,
                align: REGION_ALIGN,
            });
        }
        if region.len() < HEADER_SIZE + MIN_CAPACITY {
            return Err(RingError::RegionTooSmall {
                len: region.len(),
                min: HEADER_SIZE + MIN_CAPACITY,
            });
        }
        let capacity = region.capacity();
        if capacity > MAX_LOCAL_CAPACITY {
            return Err(RingError::InvalidCapacity {
                capacity,
                min: MIN_CAPACITY,
                max: MAX_LOCAL_CAPACITY,
            });
        }

        // SAFETY: the Region contract guarantees `len()` valid, aligned bytes at `base`
        // for as long as `region` lives, and the buffer keeps it alive.
        let view = unsafe { RegionView::new(base, capacity) };
        let (read, write) = (view.read_index(), view.write_index());
        if read >= capacity || write >= capacity {
            return Err(RingError::CorruptHeader {
                read: read as u32,
                write: write as u32,
                capacity,
            });
        }

        tracing::debug!(
            region = %region.describe(),
            capacity,
            read_index = read,
            write_index = write,
            "record buffer attached"
        );

        Ok(Self {
            region: Box::new(region),
            view,
            writer: Mutex::new(()),
            reader: Mutex::new(()),
        })
    }

    /// Append one record.
    ///
    /// Returns `true` if the whole record (length prefix and payload, wrapped as
    /// needed) was committed, and `false` if there is not enough free space. A `false`
    /// return leaves the region byte-for-byte unchanged; it is the backpressure signal,
    /// not an error.
    ///
    /// Records longer than [`MAX_RECORD_LEN`] are refused the same way. Callers should
    /// reject them earlier (see [`Record`](crate::record::Record)).
    pub fn put(&self, bytes: &[u8]) -> bool {
        let len = bytes.len();
        if len > MAX_RECORD_LEN {
            tracing::warn!(len, max = MAX_RECORD_LEN, "refusing oversized record");
            return false;
        }

        let _role = self.writer.lock();
        let capacity = self.view.capacity();
        let read = self.view.read_index();
        let mut write = self.view.write_index();
        let needed = len + LEN_PREFIX_SIZE;

        if free_space(read, write, capacity) <= needed {
            tracing::trace!(len, read, write, "record buffer full");
            return false;
        }

        let prefix = (len as u16).to_be_bytes();
        let until_end = capacity - write;

        // SAFETY: every range below lies inside [0, capacity) and inside the free part
        // of the ring (checked above), which the reader never touches.
        unsafe {
            if until_end >= needed {
                self.view.write_payload(write, &prefix);
                self.view.write_payload(write + LEN_PREFIX_SIZE, bytes);
                write += needed;
                if write == capacity {
                    write = 0;
                }
            } else if until_end > 1 {
                // Prefix fits, payload wraps.
                let head = until_end - LEN_PREFIX_SIZE;
                self.view.write_payload(write, &prefix);
                self.view.write_payload(write + LEN_PREFIX_SIZE, &bytes[..head]);
                self.view.write_payload(0, &bytes[head..]);
                write = len - head;
            } else {
                // Only one byte left before the end: the prefix itself wraps.
                self.view.write_payload(write, &prefix[..1]);
                self.view.write_payload(0, &prefix[1..]);
                self.view.write_payload(1, bytes);
                write = 1 + len;
            }
        }

        self.view.set_write_index(write);
        tracing::trace!(len, write_index = write, "record committed");
        true
    }

    /// Remove and return the oldest unread record, or `None` if the buffer is empty.
    ///
    /// Only one reader may consume a buffer; a reader in another process and a local
    /// call to `get` must not be combined.
    pub fn get(&self) -> Option<Vec<u8>> {
        let _role = self.reader.lock();
        reader::take_record(&self.view)
    }

    /// Run `f` with the reader role held.
    pub(crate) fn with_reader<T>(&self, f: impl FnOnce(&RegionView) -> T) -> T {
        let _role = self.reader.lock();
        f(&self.view)
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.view.capacity()
    }

    /// Current read cursor (payload-relative).
    pub fn read_index(&self) -> usize {
        self.view.read_index()
    }

    /// Current write cursor (payload-relative).
    pub fn write_index(&self) -> usize {
        self.view.write_index()
    }

    /// Free payload bytes right now.
    ///
    /// A record of `n` bytes fits only if this is strictly greater than `n + 2`.
    pub fn remaining(&self) -> usize {
        free_space(self.read_index(), self.write_index(), self.capacity())
    }

    /// Bytes occupied by unread records (length prefixes included).
    pub fn unread_bytes(&self) -> usize {
        self.capacity() - self.remaining()
    }

    /// Whether no unread record is buffered.
    pub fn is_empty(&self) -> bool {
        self.read_index() == self.write_index()
    }

    /// Size of the whole region in bytes, cursor header included.
    pub fn total_len(&self) -> usize {
        self.region.len()
    }

    /// Whether this buffer may be mapped by another process.
    pub fn is_shareable(&self) -> bool {
        self.capacity() <= MAX_SHARED_CAPACITY
    }

    /// Decoded cursor header.
    pub fn header(&self) -> HeaderSnapshot {
        HeaderSnapshot {
            read_index: self.read_index() as u32,
            write_index: self.write_index() as u32,
        }
    }

    /// Copy of the raw region bytes (header followed by payload), exactly as a foreign
    /// reader would see them.
    ///
    /// Waits for both roles, so the copy never observes a half-applied operation.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let (_writer, _reader) = self.lock_both();
        // SAFETY: both roles are held, nothing in this process mutates the region.
        unsafe { self.view.copy_region() }
    }

    fn lock_both(&self) -> (MutexGuard<'_, ()>, MutexGuard<'_, ()>) {
        let writer = self.writer.lock();
        let reader = self.reader.lock();
        (writer, reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Move both cursors to `index` without writing records.
    fn position(buffer: &RecordBuffer, index: usize) {
        let (_w, _r) = buffer.lock_both();
        buffer.view.set_write_index(index);
        buffer.view.set_read_index(index);
    }

    #[test]
    fn test_put_and_get() {
        let buffer = RecordBuffer::with_capacity(9).unwrap();
        assert!(buffer.put(b"hello"));
        assert_eq!(buffer.get().unwrap(), b"hello");
        assert_eq!(
            buffer.raw_bytes(),
            vec![0, 0, 0, 7, 0, 0, 0, 7, 0, 5, 104, 101, 108, 108, 111, 0, 0]
        );
    }

    #[test]
    fn test_wrap_prefix_fits_payload_splits() {
        let buffer = RecordBuffer::with_capacity(9).unwrap();
        position(&buffer, 6);

        assert!(buffer.put(b"hello"));
        assert_eq!(
            buffer.raw_bytes(),
            vec![0, 0, 0, 6, 0, 0, 0, 4, 101, 108, 108, 111, 0, 0, 0, 5, 104]
        );
        assert_eq!(buffer.get().unwrap(), b"hello");
        assert_eq!(buffer.read_index(), 4);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_wrap_prefix_fills_end() {
        let buffer = RecordBuffer::with_capacity(9).unwrap();
        position(&buffer, 7);

        assert!(buffer.put(b"hello"));
        assert_eq!(
            buffer.raw_bytes(),
            vec![0, 0, 0, 7, 0, 0, 0, 5, 104, 101, 108, 108, 111, 0, 0, 0, 5]
        );
        assert_eq!(buffer.get().unwrap(), b"hello");
        assert_eq!(buffer.read_index(), 5);
    }

    #[test]
    fn test_wrap_prefix_splits() {
        let buffer = RecordBuffer::with_capacity(9).unwrap();
        position(&buffer, 8);

        assert!(buffer.put(b"hello"));
        assert_eq!(
            buffer.raw_bytes(),
            vec![0, 0, 0, 8, 0, 0, 0, 6, 5, 104, 101, 108, 108, 111, 0, 0, 0]
        );
        assert_eq!(buffer.get().unwrap(), b"hello");
        assert_eq!(buffer.read_index(), 6);
    }

    #[test]
    fn test_record_ending_exactly_at_capacity_wraps_cursor() {
        let buffer = RecordBuffer::with_capacity(14).unwrap();
        position(&buffer, 7);

        assert!(buffer.put(b"hello"));
        assert_eq!(buffer.write_index(), 0);
        assert_eq!(buffer.get().unwrap(), b"hello");
        assert_eq!(buffer.read_index(), 0);
    }

    #[test]
    fn test_put_that_would_fill_exactly_is_refused() {
        let buffer = RecordBuffer::with_capacity(14).unwrap();
        position(&buffer, 7);
        assert!(buffer.put(b"hello"));

        // 7 bytes free, record needs 7: accepting it would make the buffer look empty.
        let before = buffer.raw_bytes();
        assert!(!buffer.put(b"hello"));
        assert_eq!(buffer.raw_bytes(), before);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_no_free_space() {
        let buffer = RecordBuffer::with_capacity(9).unwrap();
        assert!(buffer.put(b"hello"));

        let before = buffer.raw_bytes();
        assert!(!buffer.put(b"hello"));
        assert_eq!(buffer.raw_bytes(), before);
    }

    #[test]
    fn test_free_space_reclaimed() {
        let buffer = RecordBuffer::with_capacity(9).unwrap();
        assert_eq!((buffer.read_index(), buffer.write_index()), (0, 0));

        assert!(buffer.put(b"hello"));
        assert_eq!((buffer.read_index(), buffer.write_index()), (0, 7));

        assert_eq!(buffer.get().unwrap(), b"hello");
        assert_eq!((buffer.read_index(), buffer.write_index()), (7, 7));

        assert!(buffer.put(b"hello"));
        assert_eq!((buffer.read_index(), buffer.write_index()), (7, 5));

        assert_eq!(buffer.get().unwrap(), b"hello");
        assert_eq!((buffer.read_index(), buffer.write_index()), (5, 5));
    }

    #[test]
    fn test_empty_record() {
        let buffer = RecordBuffer::with_capacity(3).unwrap();
        assert!(buffer.put(b""));
        assert_eq!(buffer.unread_bytes(), 2);
        assert!(!buffer.put(b""));
        assert_eq!(buffer.get().unwrap(), Vec::<u8>::new());
        assert_eq!(buffer.get(), None);
    }

    #[test]
    fn test_oversized_record_refused() {
        let buffer = RecordBuffer::with_capacity(200_000).unwrap();
        let before = buffer.header();
        assert!(!buffer.put(&vec![0u8; MAX_RECORD_LEN + 1]));
        assert_eq!(buffer.header(), before);

        assert!(buffer.put(&vec![7u8; MAX_RECORD_LEN]));
        assert_eq!(buffer.get().unwrap().len(), MAX_RECORD_LEN);
    }

    #[test]
    fn test_invalid_capacity() {
        assert!(matches!(
            RecordBuffer::with_capacity(2),
            Err(RingError::InvalidCapacity { .. })
        ));
        assert!(matches!(
            RecordBuffer::with_capacity(0),
            Err(RingError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let region = HeapRegion::new(HEADER_SIZE + 9);
        // SAFETY: test-only poke at the header of an unshared region.
        unsafe {
            let base = region.base().as_ptr();
            std::ptr::copy_nonoverlapping([0u8, 0, 0, 9].as_ptr(), base, 4);
        }
        let result = RecordBuffer::from_region(region);
        assert!(matches!(result, Err(RingError::CorruptHeader { read: 9, .. })));
    }

    #[test]
    fn test_remaining_accounting() {
        let buffer = RecordBuffer::with_capacity(32).unwrap();
        assert_eq!(buffer.remaining(), 32);
        buffer.put(b"abc");
        buffer.put(b"defgh");
        assert_eq!(buffer.unread_bytes(), 5 + 7);
        buffer.get();
        assert_eq!(buffer.unread_bytes(), 7);
    }
}
