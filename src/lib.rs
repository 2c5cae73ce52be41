//! # Exceptional
//!
//! A fixed-capacity circular record buffer that lives in memory shared between
//! processes, plus the single-writer machinery that feeds it from many threads.
//!
//! Producers hand variable-length records (at most 65535 bytes each) to a
//! [`WriteCoordinator`], which serializes them onto one draining thread. That thread
//! writes each record into a [`RecordBuffer`] and then pokes a [`ConsumerSignal`] so an
//! out-of-process reader knows there is something new. The reader walks the region on
//! its own, using two big-endian cursors stored in the region header.
//!
//! ## Crate Structure
//!
//! - **`buffer`**: The circular buffer itself (`RecordBuffer`), its wire layout
//!   (`buffer::layout`) and the memory it can live in (`buffer::region`: heap, a
//!   memory-mapped file, or a caller-supplied region).
//! - **`coordinator`**: `WriteCoordinator`, the lock-free pending queue and the draining
//!   thread with its backpressure loop.
//! - **`signal`**: The `ConsumerSignal` hook fired after each committed record.
//! - **`reader`**: `ReferenceReader`, an in-process reader following the same protocol
//!   as external consumers.
//! - **`record`**: The length-checked `Record` payload type.
//! - **`report`**: JSON exception reports, the payload codec and `ExceptionLogger`.
//! - **`store`**: `ReportStore`, the JSON-lines sink for reports collected by `tail`.
//! - **`config`**: Figment-based configuration (`config/exceptional.toml` + env).
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: The crate-wide `RingError`.
//!
//! ## Wire layout
//!
//! ```text
//! offset 0   u32 BE  readIndex   (payload-relative)
//! offset 4   u32 BE  writeIndex  (payload-relative)
//! offset 8   payload, `capacity` bytes, records as [u16 BE len][bytes] wrapping at the end
//! ```

pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod reader;
pub mod record;
pub mod report;
pub mod signal;
pub mod store;

pub use buffer::RecordBuffer;
pub use coordinator::{CoordinatorState, DrainStats, WriteCoordinator};
pub use error::{RingError, RingResult};
pub use reader::ReferenceReader;
pub use record::Record;
pub use report::{ExceptionLogger, ExceptionReport, PayloadCodec, StackFrame};
pub use signal::{ConsumerSignal, NoopSignal, SignalError};
pub use store::{ReportStore, StoredReport};
