//! Custom error types for the crate.
//!
//! `RingError` is the single error type surfaced by the library. Using the `thiserror`
//! crate, it covers the conditions that are genuinely exceptional for a record buffer:
//!
//! - **Construction failures** (`InvalidCapacity`, `RegionTooSmall`, `Misaligned`,
//!   `CorruptHeader`): the backing storage cannot host a buffer.
//! - **Contract violations** (`RecordTooLarge`): a producer tried to hand over a record
//!   whose length does not fit the 16-bit length prefix.
//! - **Pipeline failures** (`Signal`, `DrainPanicked`): the draining thread stopped for a
//!   reason the owning process has to decide about.
//! - **Ambient failures** (`Io`, `Config`, `Configuration`, `Codec`).
//!
//! A full buffer and an empty buffer are *not* errors. `RecordBuffer::put` reports
//! backpressure with `false`, and `RecordBuffer::get` reports "nothing to read" with `None`.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type RingResult<T> = std::result::Result<T, RingError>;

/// Errors surfaced by the record buffer, the coordinator and their ambient layers.
#[derive(Error, Debug)]
pub enum RingError {
    /// Payload capacity outside the supported range.
    #[error("Invalid buffer capacity {capacity}: must be between {min} and {max} bytes")]
    InvalidCapacity {
        /// Requested capacity in bytes.
        capacity: usize,
        /// Smallest accepted capacity.
        min: usize,
        /// Largest accepted capacity.
        max: usize,
    },

    /// Record payload does not fit the 16-bit length prefix.
    #[error("Record of {len} bytes exceeds the maximum record size of {max} bytes")]
    RecordTooLarge {
        /// Payload length in bytes.
        len: usize,
        /// Largest payload a record may carry.
        max: usize,
    },

    /// Region cannot hold the header plus the minimum payload.
    #[error("Memory region of {len} bytes is too small (need at least {min})")]
    RegionTooSmall {
        /// Region length in bytes.
        len: usize,
        /// Smallest usable region.
        min: usize,
    },

    /// Region base address is not aligned for the cursor words.
    #[error("Memory region base address {addr:#x} is not {align}-byte aligned")]
    Misaligned {
        /// Base address of the region.
        addr: usize,
        /// Required alignment.
        align: usize,
    },

    /// Stored cursors point outside the payload region.
    #[error("Corrupt buffer header: read={read} write={write} capacity={capacity}")]
    CorruptHeader {
        /// Stored read cursor.
        read: u32,
        /// Stored write cursor.
        write: u32,
        /// Payload capacity of the region.
        capacity: usize,
    },

    /// File or mapping failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Consumer signal failed and stopped the draining thread.
    #[error("Consumer signal failed: {0}")]
    Signal(String),

    /// Report payload could not be encoded or decoded.
    #[error("Payload codec error: {0}")]
    Codec(String),

    /// The draining thread panicked.
    #[error("Draining thread panicked")]
    DrainPanicked,
}

impl RingError {
    /// Whether a caller could reasonably retry or carry on after this error.
    ///
    /// Oversized records and payload codec failures only affect the single record
    /// involved; everything else means the buffer or pipeline is unusable.
    pub fn can_recover(&self) -> bool {
        matches!(self, RingError::RecordTooLarge { .. } | RingError::Codec(_))
    }
}

impl From<serde_json::Error> for RingError {
    fn from(value: serde_json::Error) -> Self {
        RingError::Codec(value.to_string())
    }
}
