//! Length-checked record payloads.
//!
//! The buffer stores lengths in a 16-bit prefix. [`Record`] enforces that limit when the
//! record is built, at the producer boundary, so nothing downstream has to truncate or
//! reject anything.

use crate::buffer::layout::MAX_RECORD_LEN;
use crate::error::{RingError, RingResult};

/// An owned record payload of at most [`Record::MAX_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record(Vec<u8>);

impl Record {
    /// Largest payload a record may carry.
    pub const MAX_LEN: usize = MAX_RECORD_LEN;

    /// Wrap `bytes`, rejecting payloads longer than [`Record::MAX_LEN`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> RingResult<Self> {
        let bytes = bytes.into();
        if bytes.len() > Self::MAX_LEN {
            return Err(RingError::RecordTooLarge {
                len: bytes.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Self(bytes))
    }

    /// Payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty (empty records are valid).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space the record takes inside the buffer, length prefix included.
    pub fn encoded_len(&self) -> usize {
        self.0.len() + crate::buffer::layout::LEN_PREFIX_SIZE
    }

    /// Unwrap the payload.
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for Record {
    type Error = RingError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&[u8]> for Record {
    type Error = RingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Record {
    type Error = RingError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.as_bytes())
    }
}
