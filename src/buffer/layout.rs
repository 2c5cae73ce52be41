#![allow(unsafe_code)]
//! Wire layout of a record buffer region.
//!
//! The layout is fixed so that a process that never links this crate can locate the
//! cursors and walk the records with nothing but the raw bytes:
//!
//! ```text
//! offset 0..4   read_index   u32 big-endian, payload-relative
//! offset 4..8   write_index  u32 big-endian, payload-relative
//! offset 8..T   payload      capacity = T - 8 bytes, circular
//!
//! record        [len: u16 big-endian][len payload bytes]
//! ```
//!
//! Both cursors are always in `[0, capacity)`. Records wrap at `capacity`; the length
//! prefix itself may be split (high byte at `capacity - 1`, low byte at `0`).

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Byte offset of the read cursor inside the region.
pub const READ_INDEX_OFFSET: usize = 0;

/// Byte offset of the write cursor inside the region.
pub const WRITE_INDEX_OFFSET: usize = 4;

/// Size of the cursor header preceding the payload region.
pub const HEADER_SIZE: usize = 8;

/// Size of the big-endian length prefix in front of every record.
pub const LEN_PREFIX_SIZE: usize = 2;

/// Largest payload a single record can carry (16-bit length prefix).
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// Smallest usable payload capacity: an empty record plus the byte that is always
/// kept free so that `read_index == write_index` only ever means "empty".
pub const MIN_CAPACITY: usize = LEN_PREFIX_SIZE + 1;

/// Largest payload capacity of a region meant to be mapped by another process.
pub const MAX_SHARED_CAPACITY: usize = 0xFFF7;

/// Largest payload capacity of a process-local region (cursors are 32-bit).
pub const MAX_LOCAL_CAPACITY: usize = u32::MAX as usize - HEADER_SIZE;

/// Required alignment of a region base address (the cursors are 32-bit words).
pub const REGION_ALIGN: usize = std::mem::align_of::<AtomicU32>();

/// Cursor values decoded from the first [`HEADER_SIZE`] bytes of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSnapshot {
    /// Payload-relative offset of the oldest unread record.
    pub read_index: u32,
    /// Payload-relative offset where the next record will be written.
    pub write_index: u32,
}

impl HeaderSnapshot {
    /// Decode the header from raw region bytes, as a foreign reader would.
    ///
    /// Returns `None` if `bytes` is shorter than the header.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let read = bytes.get(READ_INDEX_OFFSET..READ_INDEX_OFFSET + 4)?;
        let write = bytes.get(WRITE_INDEX_OFFSET..WRITE_INDEX_OFFSET + 4)?;
        Some(Self {
            read_index: u32::from_be_bytes(read.try_into().ok()?),
            write_index: u32::from_be_bytes(write.try_into().ok()?),
        })
    }
}

/// Free payload bytes given both cursors.
///
/// Equal cursors mean an empty buffer, so the whole capacity is free.
pub fn free_space(read_index: usize, write_index: usize, capacity: usize) -> usize {
    if write_index >= read_index {
        capacity - write_index + read_index
    } else {
        read_index - write_index
    }
}

/// Typed view over a raw region: cursor words at fixed offsets, payload after them.
///
/// The view does not own the memory. Whoever builds it guarantees that the region
/// outlives every use of the view.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionView {
    base: NonNull<u8>,
    capacity: usize,
}

impl RegionView {
    /// # Safety
    /// `base` must point to `HEADER_SIZE + capacity` bytes valid for reads and writes
    /// for the lifetime of the view, aligned to [`REGION_ALIGN`].
    pub(crate) unsafe fn new(base: NonNull<u8>, capacity: usize) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % REGION_ALIGN, 0);
        Self { base, capacity }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn cursor(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: offset is 0 or 4 and the base is word-aligned, so the cursor word is
        // in bounds and aligned. AtomicU32 has the same layout as u32.
        unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) }
    }

    fn load_cursor(&self, offset: usize) -> usize {
        u32::from_be(self.cursor(offset).load(Ordering::Acquire)) as usize
    }

    fn store_cursor(&self, offset: usize, value: usize) {
        debug_assert!(value < self.capacity);
        self.cursor(offset)
            .store((value as u32).to_be(), Ordering::Release);
    }

    pub(crate) fn read_index(&self) -> usize {
        self.load_cursor(READ_INDEX_OFFSET)
    }

    pub(crate) fn write_index(&self) -> usize {
        self.load_cursor(WRITE_INDEX_OFFSET)
    }

    /// Publish a new read cursor. Every payload read must happen before this call.
    pub(crate) fn set_read_index(&self, value: usize) {
        self.store_cursor(READ_INDEX_OFFSET, value);
    }

    /// Publish a new write cursor. Every payload write must happen before this call.
    pub(crate) fn set_write_index(&self, value: usize) {
        self.store_cursor(WRITE_INDEX_OFFSET, value);
    }

    /// Copy `src` into the payload region starting at `index`.
    ///
    /// # Safety
    /// `index + src.len() <= capacity`, and no other thread may access those bytes
    /// concurrently (they must lie in the free part of the ring).
    pub(crate) unsafe fn write_payload(&self, index: usize, src: &[u8]) {
        debug_assert!(index + src.len() <= self.capacity);
        let dest = self.base.as_ptr().add(HEADER_SIZE + index);
        std::ptr::copy_nonoverlapping(src.as_ptr(), dest, src.len());
    }

    /// Copy payload bytes starting at `index` into `dst`.
    ///
    /// # Safety
    /// `index + dst.len() <= capacity`, and no other thread may write those bytes
    /// concurrently (they must lie in the unread part of the ring).
    pub(crate) unsafe fn read_payload(&self, index: usize, dst: &mut [u8]) {
        debug_assert!(index + dst.len() <= self.capacity);
        let src = self.base.as_ptr().add(HEADER_SIZE + index);
        std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
    }

    /// Copy the whole region (header and payload) out.
    ///
    /// # Safety
    /// Neither cursor role may be active while copying.
    pub(crate) unsafe fn copy_region(&self) -> Vec<u8> {
        let len = HEADER_SIZE + self.capacity;
        let mut out = vec![0u8; len];
        std::ptr::copy_nonoverlapping(self.base.as_ptr(), out.as_mut_ptr(), len);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_space() {
        // empty
        assert_eq!(free_space(0, 0, 9), 9);
        assert_eq!(free_space(6, 6, 9), 9);
        // writer ahead of reader
        assert_eq!(free_space(0, 7, 9), 2);
        // writer wrapped behind reader
        assert_eq!(free_space(7, 5, 9), 2);
        assert_eq!(free_space(8, 0, 9), 8);
    }

    #[test]
    fn test_header_decode() {
        let bytes = [0, 0, 0, 7, 0, 0, 1, 2, 0xAA];
        let header = HeaderSnapshot::decode(&bytes).unwrap();
        assert_eq!(header.read_index, 7);
        assert_eq!(header.write_index, 258);

        assert!(HeaderSnapshot::decode(&bytes[..7]).is_none());
    }

    #[test]
    fn test_cursor_words_are_big_endian() {
        let mut words = [0u32; 4];
        let base = NonNull::new(words.as_mut_ptr() as *mut u8).unwrap();
        let view = unsafe { RegionView::new(base, 8) };

        view.set_read_index(3);
        view.set_write_index(5);

        let raw = unsafe { view.copy_region() };
        assert_eq!(&raw[..HEADER_SIZE], &[0, 0, 0, 3, 0, 0, 0, 5]);
        assert_eq!(view.read_index(), 3);
        assert_eq!(view.write_index(), 5);
    }

    #[test]
    fn test_shared_capacity_bound() {
        assert_eq!(MAX_SHARED_CAPACITY, 65_527);
        assert!(MAX_RECORD_LEN + LEN_PREFIX_SIZE > MAX_SHARED_CAPACITY);
    }
}
