//! Channels carrying values from a worker to its supervisor
//!
//! [`Channel`] is the put/get contract shared by both flavors:
//!
//! - [`ThreadQueue`] (in-process): a crossbeam unbounded channel. Only
//!   threads of the creating process can observe what is put into it.
//! - `ProcessQueue` (cross-process, in `loopvisor-runtime`): a pipe
//!   created before `fork`, readable by the parent after the child writes.
//!
//! A worker checks [`Channel::flavor`] against its execution context in
//! `start()`. A forked child writing into a `ThreadQueue` would write into
//! its own copy of the queue, and the supervisor would wait forever.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::constants::{QUEUE_POLL_INTERVAL_US, QUEUE_SETTLE_WINDOW_MS, SAFE_GET_TIMEOUT_MS};
use crate::error::{ChannelError, ChannelResult};
use crate::fault::ErrorReport;
use crate::kprint::LogLevel;

/// Which address spaces a channel can bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFlavor {
    /// Threads of one process
    InProcess,
    /// Parent and forked child processes
    CrossProcess,
}

impl fmt::Display for ChannelFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelFlavor::InProcess => write!(f, "an in-process queue"),
            ChannelFlavor::CrossProcess => write!(f, "a cross-process queue"),
        }
    }
}

/// Put/get contract shared by in-process and cross-process queues
pub trait Channel<T>: Send + Sync {
    fn flavor(&self) -> ChannelFlavor;

    fn put(&self, item: T) -> ChannelResult<()>;

    /// Block until an item is available
    fn get(&self) -> ChannelResult<T>;

    /// Return `Err(ChannelError::Empty)` immediately if nothing is queued
    fn get_nowait(&self) -> ChannelResult<T>;

    /// Return `Err(ChannelError::Timeout)` if nothing arrives in time
    fn get_timeout(&self, timeout: Duration) -> ChannelResult<T>;

    fn is_empty(&self) -> bool;
}

/// Channel a worker reports its faults through
pub type ErrorChannel = Arc<dyn Channel<ErrorReport>>;

/// Unbounded in-process queue
pub struct ThreadQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> ThreadQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl ThreadQueue<ErrorReport> {
    /// Shorthand for an error channel backed by a fresh `ThreadQueue`
    pub fn error_channel() -> ErrorChannel {
        Arc::new(Self::new())
    }
}

impl<T> Default for ThreadQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ThreadQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> fmt::Debug for ThreadQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadQueue").field("len", &self.len()).finish()
    }
}

impl<T: Send> Channel<T> for ThreadQueue<T> {
    fn flavor(&self) -> ChannelFlavor {
        ChannelFlavor::InProcess
    }

    fn put(&self, item: T) -> ChannelResult<()> {
        self.tx.send(item).map_err(|_| ChannelError::Disconnected)
    }

    fn get(&self) -> ChannelResult<T> {
        self.rx.recv().map_err(|_| ChannelError::Disconnected)
    }

    fn get_nowait(&self) -> ChannelResult<T> {
        self.rx.try_recv().map_err(|e| match e {
            TryRecvError::Empty => ChannelError::Empty,
            TryRecvError::Disconnected => ChannelError::Disconnected,
        })
    }

    fn get_timeout(&self, timeout: Duration) -> ChannelResult<T> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ChannelError::Timeout,
            RecvTimeoutError::Disconnected => ChannelError::Disconnected,
        })
    }

    fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

fn eventually<T, C>(queue: &C, want_empty: bool) -> bool
where
    C: Channel<T> + ?Sized,
{
    let deadline = Instant::now() + Duration::from_millis(QUEUE_SETTLE_WINDOW_MS);
    loop {
        if queue.is_empty() == want_empty {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_micros(QUEUE_POLL_INTERVAL_US));
    }
}

/// Check if the queue becomes empty within the settle window
pub fn is_queue_eventually_empty<T, C>(queue: &C) -> bool
where
    C: Channel<T> + ?Sized,
{
    eventually(queue, true)
}

/// Check if the queue holds something within the settle window
pub fn is_queue_eventually_not_empty<T, C>(queue: &C) -> bool
where
    C: Channel<T> + ?Sized,
{
    eventually(queue, false)
}

/// Get one item, waiting briefly; `None` if nothing arrived
pub fn safe_get<T, C>(queue: &C) -> Option<T>
where
    C: Channel<T> + ?Sized,
{
    queue
        .get_timeout(Duration::from_millis(SAFE_GET_TIMEOUT_MS))
        .ok()
}

/// Take everything currently queued without waiting
pub fn drain<T, C>(queue: &C) -> Vec<T>
where
    C: Channel<T> + ?Sized,
{
    let mut items = Vec::new();
    while let Ok(item) = queue.get_nowait() {
        items.push(item);
    }
    items
}

/// Ship a log message to a supervisor through `queue`.
///
/// The message is queued only when `threshold` admits `level`; anything
/// filtered out returns `Ok(())` without touching the queue.
pub fn put_log_message_into_queue<T, C>(
    level: LogLevel,
    message: T,
    queue: &C,
    threshold: LogLevel,
) -> ChannelResult<()>
where
    C: Channel<T> + ?Sized,
{
    if !threshold.allows(level) {
        return Ok(());
    }
    queue.put(message)
}
