//! Single-writer hand-off for many producer threads.
//!
//! [`RecordBuffer`] must only ever be written by one thread. The coordinator gives every
//! producer a non-blocking [`submit`](WriteCoordinator::submit) that pushes onto an
//! unbounded lock-free queue, and owns the one draining thread that pops records in
//! arrival order and writes them into the buffer.
//!
//! # Data flow
//!
//! ```text
//! producer ──submit──▶ SegQueue ──pop──▶ drain thread ──put──▶ RecordBuffer
//!                                              │
//!                                              └──notify──▶ ConsumerSignal
//! ```
//!
//! # Backpressure
//!
//! When `put` reports a full buffer the drain thread retries the *same* record, without
//! popping further ones, with escalating backoff: spin hints, then `yield_now`, then
//! short sleeps. The lifecycle flag is checked on every retry, so a full buffer never
//! makes the thread unkillable.
//!
//! # Shutdown
//!
//! [`close`](WriteCoordinator::close) is lossy by design: records still queued are
//! discarded (and counted), and a record stuck in the retry loop is abandoned. A record
//! is never left half-written in the buffer, because `put` either commits it entirely
//! or not at all.

use crate::buffer::RecordBuffer;
use crate::config::WriterConfig;
use crate::error::{RingError, RingResult};
use crate::record::Record;
use crate::signal::ConsumerSignal;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{fence, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const STARTING: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Name of the draining thread, visible in logs and debuggers.
pub const DRAIN_THREAD_NAME: &str = "exceptional-drain";

/// Lifecycle of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Constructed, draining thread not spawned yet. Submissions are queued.
    Starting,
    /// Draining thread is running.
    Running,
    /// Closed (or stopped by a notifier failure). Submissions are discarded.
    Stopped,
}

impl CoordinatorState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STARTING => CoordinatorState::Starting,
            RUNNING => CoordinatorState::Running,
            _ => CoordinatorState::Stopped,
        }
    }
}

/// Counters describing what happened to submitted records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Records accepted by `submit`.
    pub submitted: u64,
    /// Records committed to the buffer.
    pub written: u64,
    /// Retries caused by a full buffer.
    pub full_retries: u64,
    /// Records discarded: queued at close, abandoned mid-retry, or submitted after close.
    pub dropped: u64,
}

/// State shared between producers, the owner and the draining thread.
#[derive(Debug)]
struct Shared {
    pending: SegQueue<Record>,
    state: AtomicU8,
    submitted: AtomicU64,
    written: AtomicU64,
    full_retries: AtomicU64,
    dropped: AtomicU64,
    // Submitted records that were written, abandoned or discarded.
    settled: AtomicU64,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Pop and count everything still queued. Returns how many records were dropped.
    fn discard_pending(&self) -> u64 {
        let mut discarded = 0u64;
        while self.pending.pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            self.dropped.fetch_add(discarded, Ordering::Relaxed);
            self.settled.fetch_add(discarded, Ordering::Release);
        }
        discarded
    }

    fn stats(&self) -> DrainStats {
        DrainStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            full_retries: self.full_retries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Serializes concurrent producers into the single writer of a [`RecordBuffer`].
pub struct WriteCoordinator {
    shared: Arc<Shared>,
    buffer: Arc<RecordBuffer>,
    config: WriterConfig,
    // Moved into the draining thread by `start`.
    signal: Mutex<Option<Box<dyn ConsumerSignal>>>,
    drain: Mutex<Option<JoinHandle<RingResult<()>>>>,
    drain_thread: OnceLock<Thread>,
    // Serializes `close` callers.
    close_lock: Mutex<()>,
}

impl std::fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("state", &self.state())
            .field("pending", &self.pending_len())
            .field("stats", &self.stats())
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl WriteCoordinator {
    /// Create a coordinator for `buffer` without starting the draining thread.
    ///
    /// Records submitted before [`start`](Self::start) are queued.
    pub fn new(
        buffer: Arc<RecordBuffer>,
        signal: impl ConsumerSignal + 'static,
        config: WriterConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: SegQueue::new(),
                state: AtomicU8::new(STARTING),
                submitted: AtomicU64::new(0),
                written: AtomicU64::new(0),
                full_retries: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                settled: AtomicU64::new(0),
            }),
            buffer,
            config,
            signal: Mutex::new(Some(Box::new(signal))),
            drain: Mutex::new(None),
            drain_thread: OnceLock::new(),
            close_lock: Mutex::new(()),
        }
    }

    /// Create a coordinator and start its draining thread.
    ///
    /// # Example
    /// ```
    /// use exceptional::buffer::RecordBuffer;
    /// use exceptional::config::WriterConfig;
    /// use exceptional::coordinator::WriteCoordinator;
    /// use exceptional::record::Record;
    /// use exceptional::signal::NoopSignal;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let buffer = Arc::new(RecordBuffer::with_capacity(1024)?);
    /// let coordinator =
    ///     WriteCoordinator::spawn(Arc::clone(&buffer), NoopSignal, WriterConfig::default())?;
    ///
    /// coordinator.submit(Record::try_from("boom")?);
    /// assert!(coordinator.wait_idle(Duration::from_secs(5)));
    /// assert_eq!(buffer.get().as_deref(), Some(&b"boom"[..]));
    ///
    /// let stats = coordinator.close()?;
    /// assert_eq!(stats.written, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(
        buffer: Arc<RecordBuffer>,
        signal: impl ConsumerSignal + 'static,
        config: WriterConfig,
    ) -> RingResult<Self> {
        let coordinator = Self::new(buffer, signal, config);
        coordinator.start()?;
        Ok(coordinator)
    }

    /// Spawn the draining thread.
    ///
    /// Idempotent: calling it on a running coordinator does nothing, and a closed
    /// coordinator cannot be restarted (the call is a no-op).
    pub fn start(&self) -> RingResult<()> {
        if self
            .shared
            .state
            .compare_exchange(STARTING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let Some(signal) = self.signal.lock().take() else {
            return Ok(());
        };
        let shared = Arc::clone(&self.shared);
        let buffer = Arc::clone(&self.buffer);
        let config = self.config.clone();

        let spawned = thread::Builder::new()
            .name(DRAIN_THREAD_NAME.to_string())
            .spawn(move || drain_loop(&shared, &buffer, signal, &config));

        match spawned {
            Ok(handle) => {
                let _ = self.drain_thread.set(handle.thread().clone());
                *self.drain.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.store(STOPPED, Ordering::Release);
                error!(error = %e, "failed to spawn draining thread");
                Err(RingError::Io(e))
            }
        }
    }

    /// Hand a record to the draining thread. Never blocks.
    ///
    /// Records from one thread are written in submission order. After
    /// [`close`](Self::close) records are discarded and counted as dropped.
    pub fn submit(&self, record: Record) {
        if self.shared.state.load(Ordering::Acquire) == STOPPED {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(len = record.len(), "coordinator stopped, discarding record");
            return;
        }
        self.shared.submitted.fetch_add(1, Ordering::Release);
        self.shared.pending.push(record);

        // `close` may have swapped the state and emptied the queue between the check
        // above and the push. Pairs with the fence in `close`.
        fence(Ordering::SeqCst);
        if self.shared.state.load(Ordering::Acquire) == STOPPED {
            let discarded = self.shared.discard_pending();
            if discarded > 0 {
                debug!(discarded, "discarded records submitted while closing");
            }
            return;
        }
        if let Some(thread) = self.drain_thread.get() {
            thread.unpark();
        }
    }

    /// Validate and submit raw bytes.
    ///
    /// Fails only if the payload is longer than [`Record::MAX_LEN`].
    pub fn try_submit(&self, bytes: impl Into<Vec<u8>>) -> RingResult<()> {
        self.submit(Record::new(bytes)?);
        Ok(())
    }

    /// Stop the draining thread and discard anything still queued.
    ///
    /// Returns the final counters, or the notifier failure that stopped the draining
    /// thread early. Calling `close` again returns the counters.
    pub fn close(&self) -> RingResult<DrainStats> {
        let _closing = self.close_lock.lock();

        let previous = self.shared.state.swap(STOPPED, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if let Some(thread) = self.drain_thread.get() {
            thread.unpark();
        }

        let handle = self.drain.lock().take();
        let outcome = match handle {
            Some(handle) => handle.join().map_err(|_| RingError::DrainPanicked)?,
            None => Ok(()),
        };

        let discarded = self.shared.discard_pending();
        if discarded > 0 {
            warn!(discarded, "discarded pending records at close");
        }

        let stats = self.stats();
        if previous != STOPPED {
            info!(
                written = stats.written,
                dropped = stats.dropped,
                full_retries = stats.full_retries,
                "write coordinator closed"
            );
        }
        outcome.map(|()| stats)
    }

    /// Block until every submitted record was written or dropped, or `timeout` passes.
    ///
    /// Returns whether the coordinator became idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let settled = self.shared.settled.load(Ordering::Acquire);
            if settled >= self.shared.submitted.load(Ordering::Acquire) {
                return true;
            }
            // once stopped and the draining thread has exited, only `close` settles more
            if self.state() == CoordinatorState::Stopped && self.drain_finished() {
                return self.shared.settled.load(Ordering::Acquire)
                    >= self.shared.submitted.load(Ordering::Acquire);
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn drain_finished(&self) -> bool {
        self.drain
            .lock()
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CoordinatorState {
        CoordinatorState::from_raw(self.shared.state.load(Ordering::Acquire))
    }

    /// Records waiting for the draining thread.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DrainStats {
        self.shared.stats()
    }

    /// The buffer this coordinator writes to.
    pub fn buffer(&self) -> &Arc<RecordBuffer> {
        &self.buffer
    }
}

impl Drop for WriteCoordinator {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "write coordinator stopped with an error");
        }
    }
}

fn drain_loop(
    shared: &Shared,
    buffer: &RecordBuffer,
    mut signal: Box<dyn ConsumerSignal>,
    config: &WriterConfig,
) -> RingResult<()> {
    info!(capacity = buffer.capacity(), "draining thread started");

    while shared.is_running() {
        let Some(record) = shared.pending.pop() else {
            thread::park_timeout(config.idle_wait());
            continue;
        };

        if !write_with_backoff(shared, buffer, &record, config) {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            shared.settled.fetch_add(1, Ordering::Release);
            debug!(len = record.len(), "abandoned record while shutting down");
            break;
        }
        shared.written.fetch_add(1, Ordering::Relaxed);
        shared.settled.fetch_add(1, Ordering::Release);

        if let Err(e) = signal.notify() {
            error!(error = %e, "consumer signal failed, stopping draining thread");
            shared.state.store(STOPPED, Ordering::Release);
            return Err(RingError::Signal(e.to_string()));
        }
    }

    info!("draining thread stopped");
    Ok(())
}

/// Put `record`, retrying while the buffer is full. Returns `false` if the coordinator
/// stopped before the record could be written.
fn write_with_backoff(
    shared: &Shared,
    buffer: &RecordBuffer,
    record: &Record,
    config: &WriterConfig,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        if buffer.put(record.as_bytes()) {
            if attempt > 0 {
                debug!(len = record.len(), retries = attempt, "buffer drained, record written");
            }
            return true;
        }
        if !shared.is_running() {
            return false;
        }
        if attempt == 0 {
            debug!(
                len = record.len(),
                remaining = buffer.remaining(),
                "buffer full, backing off"
            );
        }
        shared.full_retries.fetch_add(1, Ordering::Relaxed);
        backoff(attempt, config);
        attempt = attempt.saturating_add(1);
    }
}

fn backoff(attempt: u32, config: &WriterConfig) {
    if attempt < config.spin_retries {
        std::hint::spin_loop();
    } else if attempt < config.spin_retries.saturating_mul(2) {
        thread::yield_now();
    } else {
        thread::sleep(config.backoff());
    }
}
