//! Exception reports carried as record payloads.
//!
//! Producers describe a failure as an [`ExceptionReport`]: a message, a stack of
//! [`StackFrame`]s, an optional cause chain and the messages of suppressed errors. The
//! report is serialized to JSON with camelCase field names, so consumers written against
//! the usual `Throwable` shape can parse it directly.
//!
//! [`PayloadCodec`] turns reports into [`Record`]s (optionally LZ4-compressed with the
//! uncompressed size prepended) and back. [`ExceptionLogger`] is the producer front-end:
//! encode, then hand the record to a [`WriteCoordinator`].

use crate::config::PayloadConfig;
use crate::coordinator::{DrainStats, WriteCoordinator};
use crate::error::{RingError, RingResult};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// One frame of a captured stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Class loader that defined the class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_loader_name: Option<String>,
    /// Module containing the class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    /// Version of that module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_version: Option<String>,
    /// Method executing in this frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    /// Source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Line within the source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    /// Fully qualified class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Whether the method is native.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_method: Option<bool>,
}

impl StackFrame {
    /// Frame for `class_name::method_name`.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            method_name: Some(method_name.into()),
            ..Self::default()
        }
    }

    /// Attach a source location.
    pub fn at(mut self, file_name: impl Into<String>, line_number: u32) -> Self {
        self.file_name = Some(file_name.into());
        self.line_number = Some(line_number);
        self
    }
}

/// A captured exception, with its cause chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionReport {
    /// Exception message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Locale-specific message, when it differs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_message: Option<String>,
    /// Frames, innermost first.
    #[serde(default)]
    pub stack_trace: Vec<StackFrame>,
    /// The exception that caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ExceptionReport>>,
    /// Messages of exceptions suppressed while handling this one.
    #[serde(default)]
    pub suppressed: Vec<String>,
}

impl ExceptionReport {
    /// Report with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Append a stack frame (innermost first).
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.stack_trace.push(frame);
        self
    }

    /// Set the cause.
    pub fn with_cause(mut self, cause: ExceptionReport) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Record the message of a suppressed error.
    pub fn with_suppressed(mut self, message: impl Into<String>) -> Self {
        self.suppressed.push(message.into());
        self
    }

    /// Build a report from a Rust error, following its `source()` chain as causes.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut report = Self::new(error.to_string());
        if let Some(source) = error.source() {
            report.cause = Some(Box::new(Self::from_error(source)));
        }
        report
    }

    /// Length of the cause chain, this report included.
    pub fn depth(&self) -> usize {
        1 + self.cause.as_ref().map_or(0, |cause| cause.depth())
    }
}

/// Encodes reports into record payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadCodec {
    compress: bool,
}

impl PayloadCodec {
    /// Codec producing plain JSON (`compress = false`) or LZ4 frames of JSON.
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    /// Codec matching the `[payload]` configuration section.
    pub fn from_config(config: &PayloadConfig) -> Self {
        Self::new(config.compress)
    }

    /// Whether payloads are LZ4-compressed.
    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Serialize `report` into a record.
    ///
    /// Fails with [`RingError::RecordTooLarge`] if the encoded payload does not fit a
    /// single record.
    pub fn encode(&self, report: &ExceptionReport) -> RingResult<Record> {
        let json = serde_json::to_vec(report)?;
        let payload = if self.compress {
            lz4_flex::compress_prepend_size(&json)
        } else {
            json
        };
        Record::new(payload)
    }

    /// Parse a record payload produced by [`encode`](Self::encode).
    pub fn decode(&self, payload: &[u8]) -> RingResult<ExceptionReport> {
        if self.compress {
            let json = lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| RingError::Codec(format!("LZ4 decompression failed: {e}")))?;
            Ok(serde_json::from_slice(&json)?)
        } else {
            Ok(serde_json::from_slice(payload)?)
        }
    }
}

/// Producer front-end: encodes reports and submits them for writing.
#[derive(Debug)]
pub struct ExceptionLogger {
    coordinator: WriteCoordinator,
    codec: PayloadCodec,
}

impl ExceptionLogger {
    /// Wrap a coordinator. Start it before or after; queued reports are kept either way.
    pub fn new(coordinator: WriteCoordinator, codec: PayloadCodec) -> Self {
        Self { coordinator, codec }
    }

    /// Encode `report` and submit it. Never blocks on the buffer.
    ///
    /// Oversized reports are rejected with [`RingError::RecordTooLarge`]; nothing is
    /// submitted in that case.
    pub fn log(&self, report: &ExceptionReport) -> RingResult<()> {
        let record = match self.codec.encode(report) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, message = ?report.message, "exception report not logged");
                return Err(e);
            }
        };
        trace!(len = record.len(), "submitting exception report");
        self.coordinator.submit(record);
        Ok(())
    }

    /// Convenience for [`ExceptionReport::from_error`] followed by [`log`](Self::log).
    pub fn log_error(&self, error: &(dyn std::error::Error + 'static)) -> RingResult<()> {
        self.log(&ExceptionReport::from_error(error))
    }

    /// The underlying coordinator.
    pub fn coordinator(&self) -> &WriteCoordinator {
        &self.coordinator
    }

    /// Codec in use.
    pub fn codec(&self) -> PayloadCodec {
        self.codec
    }

    /// Close the coordinator, discarding reports not yet written.
    pub fn close(&self) -> RingResult<DrainStats> {
        self.coordinator.close()
    }
}
