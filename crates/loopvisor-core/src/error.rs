//! Error types for loopvisor workers
//!
//! Faults raised by user code inside the run loop are not errors in this
//! sense: they are captured as [`ErrorReport`](crate::fault::ErrorReport)s
//! and routed through the error channel. The types here cover everything
//! the supervisor sees synchronously.

use core::fmt;

use crate::channel::ChannelFlavor;

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors returned synchronously by worker operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Error channel flavor does not match the execution context.
    ///
    /// Raised by `start()` before the channel is touched.
    BadChannelType {
        /// Execution context name ("thread" / "process")
        context: &'static str,
        /// Flavor the context requires
        required: ChannelFlavor,
        /// Flavor that was supplied
        found: ChannelFlavor,
    },

    /// `start()` or `run()` called after the worker was started
    AlreadyStarted,

    /// Operation needs a started worker
    NotStarted,

    /// Failed to spawn the thread or fork the process
    SpawnFailed(String),

    /// Failed to join the execution unit
    JoinFailed(String),

    /// Shared memory mapping for the flag block failed (errno)
    SharedMemory(i32),

    /// Channel error
    Channel(ChannelError),

    /// Invalid configuration
    Config(ConfigError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::BadChannelType {
                context,
                required,
                found,
            } => write!(
                f,
                "error channel must be {} when starting a {} worker, not {}",
                required, context, found
            ),
            WorkerError::AlreadyStarted => write!(f, "worker already started"),
            WorkerError::NotStarted => write!(f, "worker not started"),
            WorkerError::SpawnFailed(msg) => write!(f, "failed to spawn worker: {}", msg),
            WorkerError::JoinFailed(msg) => write!(f, "failed to join worker: {}", msg),
            WorkerError::SharedMemory(errno) => {
                write!(f, "shared flag mapping failed: errno {}", errno)
            }
            WorkerError::Channel(e) => write!(f, "channel error: {}", e),
            WorkerError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<ChannelError> for WorkerError {
    fn from(e: ChannelError) -> Self {
        WorkerError::Channel(e)
    }
}

impl From<ConfigError> for WorkerError {
    fn from(e: ConfigError) -> Self {
        WorkerError::Config(e)
    }
}

/// Channel errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Nothing queued (`get_nowait`)
    Empty,

    /// Nothing arrived before the timeout (`get_timeout`)
    Timeout,

    /// All senders or the underlying pipe are gone
    Disconnected,

    /// OS error with errno
    Os(i32),

    /// A frame could not be encoded or decoded
    Codec(WireError),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Empty => write!(f, "channel empty"),
            ChannelError::Timeout => write!(f, "channel receive timed out"),
            ChannelError::Disconnected => write!(f, "channel disconnected"),
            ChannelError::Os(errno) => write!(f, "OS error: errno {}", errno),
            ChannelError::Codec(e) => write!(f, "codec error: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<WireError> for ChannelError {
    fn from(e: WireError) -> Self {
        ChannelError::Codec(e)
    }
}

/// Wire codec errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Buffer ended before the value did
    Truncated,

    /// String field is not UTF-8
    InvalidUtf8,

    /// Unknown enum discriminant
    InvalidTag(u8),

    /// Frame larger than `MAX_FRAME_SIZE`
    FrameTooLarge(usize),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => write!(f, "truncated frame"),
            WireError::InvalidUtf8 => write!(f, "invalid UTF-8 in frame"),
            WireError::InvalidTag(tag) => write!(f, "invalid tag {}", tag),
            WireError::FrameTooLarge(len) => write!(f, "frame of {} bytes too large", len),
        }
    }
}

impl std::error::Error for WireError {}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
