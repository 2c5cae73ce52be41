#![allow(unsafe_code)]
//! Read side of the record buffer.
//!
//! In production the records are consumed by a process that maps the buffer file and
//! walks it on its own. [`ReferenceReader`] performs exactly that walk in-process, so the
//! write side and the wire format can be verified without a second process, and so a
//! standalone consumer (the `tail` command) can be built on it.
//!
//! # Algorithm
//!
//! 1. If `read_index == write_index` there is nothing to read.
//! 2. Read the 2-byte big-endian length at `read_index`. If only one byte is left before
//!    the end of the payload region, the low byte is at offset 0.
//! 3. Read `len` payload bytes, continuing at offset 0 when the end is reached.
//! 4. Store the new `read_index` (wrapped to 0 when it lands on `capacity`).

use crate::buffer::layout::{RegionView, LEN_PREFIX_SIZE};
use crate::buffer::RecordBuffer;
use crate::error::RingResult;
use std::path::Path;
use std::sync::Arc;

/// Consume the oldest unread record from `view`.
pub(crate) fn take_record(view: &RegionView) -> Option<Vec<u8>> {
    let capacity = view.capacity();
    let write = view.write_index();
    let mut read = view.read_index();
    if read == write {
        return None;
    }
    if read >= capacity || write >= capacity {
        tracing::error!(read, write, capacity, "cursor outside payload region");
        return None;
    }

    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    let until_end = capacity - read;
    // SAFETY: every range is inside [0, capacity) and inside the unread part of the
    // ring, which the writer does not touch until the read cursor moves past it.
    unsafe {
        if until_end == 1 {
            view.read_payload(read, &mut prefix[..1]);
            view.read_payload(0, &mut prefix[1..]);
            read = 1;
        } else {
            view.read_payload(read, &mut prefix);
            read += LEN_PREFIX_SIZE;
            if read == capacity {
                read = 0;
            }
        }
    }

    let len = u16::from_be_bytes(prefix) as usize;
    if len + LEN_PREFIX_SIZE > capacity {
        // Only a foreign, non-conforming writer can produce this.
        tracing::error!(len, capacity, "record length exceeds buffer capacity");
        return None;
    }

    let mut record = vec![0u8; len];
    let until_end = capacity - read;
    // SAFETY: as above; `len < capacity` keeps both halves in bounds.
    unsafe {
        if len <= until_end {
            view.read_payload(read, &mut record);
            read += len;
            if read == capacity {
                read = 0;
            }
        } else {
            view.read_payload(read, &mut record[..until_end]);
            view.read_payload(0, &mut record[until_end..]);
            read = len - until_end;
        }
    }

    view.set_read_index(read);
    Some(record)
}

/// Length of the oldest unread record without consuming it.
fn peek_len(view: &RegionView) -> Option<usize> {
    let capacity = view.capacity();
    let read = view.read_index();
    if read == view.write_index() || read >= capacity {
        return None;
    }
    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    // SAFETY: see `take_record`.
    unsafe {
        if capacity - read == 1 {
            view.read_payload(read, &mut prefix[..1]);
            view.read_payload(0, &mut prefix[1..]);
        } else {
            view.read_payload(read, &mut prefix);
        }
    }
    Some(u16::from_be_bytes(prefix) as usize)
}

/// Single consumer walking a record buffer in write order.
///
/// A reader takes the buffer's reader role for every operation, so it must be the only
/// consumer of that buffer.
#[derive(Debug)]
pub struct ReferenceReader {
    buffer: Arc<RecordBuffer>,
    records_read: u64,
    bytes_read: u64,
}

impl ReferenceReader {
    /// Read from a buffer that is also being written in this process.
    #[must_use]
    pub fn new(buffer: Arc<RecordBuffer>) -> Self {
        Self {
            buffer,
            records_read: 0,
            bytes_read: 0,
        }
    }

    /// Map a shared buffer file written by another process.
    pub fn open(path: &Path) -> RingResult<Self> {
        let buffer = RecordBuffer::open_shared(path)?;
        tracing::info!(
            path = %path.display(),
            capacity = buffer.capacity(),
            "attached reader to shared record buffer"
        );
        Ok(Self::new(Arc::new(buffer)))
    }

    /// Consume the oldest unread record.
    pub fn next_record(&mut self) -> Option<Vec<u8>> {
        let record = self.buffer.with_reader(take_record)?;
        self.records_read += 1;
        self.bytes_read += record.len() as u64;
        Some(record)
    }

    /// Length of the oldest unread record, leaving it in place.
    pub fn peek_len(&self) -> Option<usize> {
        self.buffer.with_reader(peek_len)
    }

    /// Bytes currently occupied by unread records, prefixes included.
    pub fn unread_bytes(&self) -> usize {
        self.buffer.unread_bytes()
    }

    /// Consume every record that is currently available.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.by_ref().collect()
    }

    /// Number of records consumed through this reader.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Payload bytes consumed through this reader (prefixes excluded).
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// The buffer this reader consumes.
    pub fn buffer(&self) -> &Arc<RecordBuffer> {
        &self.buffer
    }
}

impl Iterator for ReferenceReader {
    type Item = Vec<u8>;

    /// Yields records until the buffer is momentarily empty.
    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}
