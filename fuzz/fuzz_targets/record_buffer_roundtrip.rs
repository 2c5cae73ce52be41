//! Fuzz target for RecordBuffer put/get against a queue model.
//!
//! Tests:
//! - Accept/reject decisions match the free-space rule exactly
//! - Records come back in FIFO order with identical bytes
//! - Cursor accounting (`remaining`, `unread_bytes`) never drifts

#![no_main]

use arbitrary::Arbitrary;
use exceptional::RecordBuffer;
use libfuzzer_sys::fuzz_target;
use std::collections::VecDeque;

#[derive(Debug, Arbitrary)]
struct RoundtripInput {
    /// Payload capacity, reduced into 3..=515
    capacity: u16,
    operations: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Put(Vec<u8>),
    Get,
}

fuzz_target!(|input: RoundtripInput| {
    let capacity = 3 + usize::from(input.capacity % 513);
    let buffer = match RecordBuffer::with_capacity(capacity) {
        Ok(b) => b,
        Err(_) => return,
    };

    let mut model: VecDeque<Vec<u8>> = VecDeque::new();
    let mut used = 0usize;

    for op in input.operations {
        match op {
            Op::Put(bytes) => {
                let should_fit = capacity - used > bytes.len() + 2;
                assert_eq!(buffer.put(&bytes), should_fit);
                if should_fit {
                    used += bytes.len() + 2;
                    model.push_back(bytes);
                }
            }
            Op::Get => {
                let expected = model.pop_front();
                if let Some(ref record) = expected {
                    used -= record.len() + 2;
                }
                assert_eq!(buffer.get(), expected);
            }
        }
        assert_eq!(buffer.unread_bytes(), used);
        assert_eq!(buffer.remaining(), capacity - used);
        assert_eq!(buffer.is_empty(), model.is_empty());
    }
});
