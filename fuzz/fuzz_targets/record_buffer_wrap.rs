//! Fuzz target for records straddling the end of the payload region.
//!
//! Tests:
//! - Positioning the cursors anywhere, including one byte before the end
//! - Split length prefixes and split payloads read back intact
//! - A second handle on the same mapped file sees the same records

#![no_main]

use arbitrary::Arbitrary;
use exceptional::RecordBuffer;
use libfuzzer_sys::fuzz_target;
use tempfile::TempDir;

#[derive(Debug, Arbitrary)]
struct WrapInput {
    /// Payload capacity, reduced into 8..=135
    capacity: u8,
    /// Where to park both cursors before the interesting writes
    offset: u8,
    /// Records written after positioning
    records: Vec<Vec<u8>>,
}

fuzz_target!(|input: WrapInput| {
    let temp_dir = match TempDir::new() {
        Ok(d) => d,
        Err(_) => return,
    };
    let path = temp_dir.path().join("fuzz_wrap.ring");

    let capacity = 8 + usize::from(input.capacity % 128);
    let writer = match RecordBuffer::create_shared(&path, capacity) {
        Ok(b) => b,
        Err(_) => return,
    };
    let reader = match RecordBuffer::open_shared(&path) {
        Ok(b) => b,
        Err(_) => return,
    };

    // Advance both cursors near `offset` with records that are consumed immediately.
    let mut target = usize::from(input.offset) % capacity;
    while target > 0 {
        let step = target.min(capacity - 3);
        let len = step.saturating_sub(2);
        let filler = vec![0xEE; len];
        assert!(writer.put(&filler));
        assert_eq!(reader.get().as_deref(), Some(&filler[..]));
        target -= (len + 2).min(target);
        if step < 2 {
            break;
        }
    }

    for record in input.records {
        let record: Vec<u8> = record.into_iter().take(capacity).collect();
        if writer.put(&record) {
            assert_eq!(reader.get(), Some(record));
        } else {
            assert!(record.len() + 2 >= writer.remaining());
        }
        assert!(reader.is_empty());
        assert_eq!(writer.read_index(), writer.write_index());
    }
});
