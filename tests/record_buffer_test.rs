//! Integration tests for RecordBuffer through its public API only.
//!
//! Cursor positioning is done the way a real writer/reader pair would get there:
//! by writing and consuming filler records.

use exceptional::buffer::layout::{HeaderSnapshot, HEADER_SIZE};
use exceptional::{RecordBuffer, RingError};

/// Advance both cursors by `bytes` (>= 2) with one consumed record.
fn advance(buffer: &RecordBuffer, bytes: usize) {
    let filler = vec![0xFF; bytes - 2];
    assert!(buffer.put(&filler));
    assert_eq!(buffer.get().unwrap(), filler);
}

#[test]
fn test_round_trip_preserves_order_and_bytes() {
    let buffer = RecordBuffer::with_capacity(1024).unwrap();
    let records: Vec<Vec<u8>> = (0..50u8)
        .map(|i| (0..i).map(|b| b.wrapping_mul(31)).collect())
        .collect();

    let mut pending = std::collections::VecDeque::new();
    for record in &records {
        while !buffer.put(record) {
            assert_eq!(buffer.get(), pending.pop_front());
        }
        pending.push_back(record.clone());
    }
    while let Some(expected) = pending.pop_front() {
        assert_eq!(buffer.get().unwrap(), expected);
    }
    assert_eq!(buffer.get(), None);
}

#[test]
fn test_wrap_with_payload_split() {
    let buffer = RecordBuffer::with_capacity(9).unwrap();
    advance(&buffer, 6);
    assert_eq!(buffer.write_index(), 6);

    assert!(buffer.put(b"hello"));
    assert_eq!(buffer.write_index(), 4);
    assert_eq!(buffer.get().unwrap(), b"hello");
}

#[test]
fn test_wrap_with_prefix_at_end() {
    let buffer = RecordBuffer::with_capacity(9).unwrap();
    advance(&buffer, 7);

    assert!(buffer.put(b"hello"));
    let raw = buffer.raw_bytes();
    // prefix occupies the last two payload bytes, payload starts at offset 0
    assert_eq!(&raw[HEADER_SIZE + 7..], &[0, 5]);
    assert_eq!(&raw[HEADER_SIZE..HEADER_SIZE + 5], b"hello");
    assert_eq!(buffer.get().unwrap(), b"hello");
}

#[test]
fn test_wrap_with_split_prefix() {
    let buffer = RecordBuffer::with_capacity(9).unwrap();
    advance(&buffer, 8);

    assert!(buffer.put(b"hello"));
    let raw = buffer.raw_bytes();
    assert_eq!(raw[HEADER_SIZE + 8], 0); // high byte
    assert_eq!(raw[HEADER_SIZE], 5); // low byte
    assert_eq!(&raw[HEADER_SIZE + 1..HEADER_SIZE + 6], b"hello");
    assert_eq!(buffer.get().unwrap(), b"hello");
    assert_eq!(buffer.read_index(), 6);
}

#[test]
fn test_full_then_reclaim() {
    let buffer = RecordBuffer::with_capacity(9).unwrap();
    assert!(buffer.put(b"hello"));
    assert_eq!(buffer.remaining(), 2);

    let before = buffer.raw_bytes();
    assert!(!buffer.put(b"hello"));
    assert_eq!(buffer.raw_bytes(), before);

    assert_eq!(buffer.get().unwrap(), b"hello");
    assert!(buffer.put(b"hello"));
    assert_eq!(buffer.get().unwrap(), b"hello");
}

#[test]
fn test_capacity_accounting_never_exceeded() {
    let buffer = RecordBuffer::with_capacity(100).unwrap();
    let mut stored = 0usize;
    for len in (0..40).cycle().take(200) {
        if buffer.put(&vec![7u8; len]) {
            stored += len + 2;
        } else {
            let removed = buffer.get().unwrap();
            stored -= removed.len() + 2;
        }
        assert!(stored < buffer.capacity());
        assert_eq!(buffer.unread_bytes(), stored);
    }
}

#[test]
fn test_header_snapshot_matches_cursors() {
    let buffer = RecordBuffer::with_capacity(32).unwrap();
    assert!(buffer.put(b"abc"));
    assert!(buffer.put(b"defg"));
    buffer.get().unwrap();

    let raw = buffer.raw_bytes();
    let header = HeaderSnapshot::decode(&raw).unwrap();
    assert_eq!(header, buffer.header());
    assert_eq!(header.read_index, 5);
    assert_eq!(header.write_index, 11);
    assert_eq!(&raw[..8], &[0, 0, 0, 5, 0, 0, 0, 11]);
}

#[test]
fn test_construction_errors() {
    assert!(matches!(
        RecordBuffer::with_capacity(2),
        Err(RingError::InvalidCapacity { capacity: 2, .. })
    ));
}
