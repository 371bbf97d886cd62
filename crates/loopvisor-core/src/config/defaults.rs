//! Library defaults for [`WorkerConfig`](super::WorkerConfig)
//!
//! Every value can be overridden at runtime through the matching `LVR_*`
//! environment variable.

use crate::kprint::LogLevel;

/// Minimum wall-clock duration of one loop pass (ms)
pub const MIN_ITERATION_MS: u64 = 10;

/// Level below which the worker's own lifecycle messages are dropped
pub const LOGGING_LEVEL: LogLevel = LogLevel::Info;

/// Sleep between pause-flag polls (ms)
pub const PAUSE_POLL_MS: u64 = 10;

/// `hard_stop()` join timeout (ms); 0 waits forever
pub const HARD_STOP_TIMEOUT_MS: u64 = 0;

/// Iteration durations kept per performance window
pub const NUM_LONGEST_ITERATIONS: usize = 5;
