//! Notification hook fired after each committed record.
//!
//! How the far side learns about new records is not the buffer's business: it might be a
//! call into a native library that then walks the shared region, a futex, or nothing at
//! all when the reader simply polls. [`ConsumerSignal`] is the seam.
//!
//! `notify` runs on the draining thread, once per successful write. A notifier that
//! blocks stalls the whole pipeline. A notifier that fails stops the draining thread and
//! the failure is reported by [`WriteCoordinator::close`](crate::coordinator::WriteCoordinator::close).

use thiserror::Error;

/// Failure reported by a [`ConsumerSignal`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SignalError(pub String);

impl SignalError {
    /// Build an error from anything displayable.
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// Tells the external reader that a record has landed.
pub trait ConsumerSignal: Send {
    /// Called after every record that became visible in the buffer.
    fn notify(&mut self) -> Result<(), SignalError>;
}

impl<F> ConsumerSignal for F
where
    F: FnMut() -> Result<(), SignalError> + Send,
{
    fn notify(&mut self) -> Result<(), SignalError> {
        self()
    }
}

/// Signal for readers that poll the cursors on their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSignal;

impl ConsumerSignal for NoopSignal {
    fn notify(&mut self) -> Result<(), SignalError> {
        Ok(())
    }
}
