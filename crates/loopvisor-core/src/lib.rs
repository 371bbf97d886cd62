//! # loopvisor-core
//!
//! Core types and the run loop for loopvisor workers.
//!
//! This crate is platform-agnostic: it knows nothing about `fork`, shared
//! mappings or pipes. The thread/process execution contexts and the
//! cross-process queue live in `loopvisor-runtime`.
//!
//! ## Modules
//!
//! - `state` - Worker lifecycle state
//! - `error` - Error types
//! - `fault` - Captured faults (`ErrorReport`) and fault formatting
//! - `flags` - Stop/pause/soft-stop flag block and its storage trait
//! - `channel` - Channel trait, in-process queue and polling helpers
//! - `wire` - Byte codec for values crossing a process boundary
//! - `throttle` - Minimum iteration duration
//! - `perf` - Per-iteration performance tracking
//! - `config` - Worker configuration with env overrides
//! - `controller` - The run loop and the `LoopBody` trait
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod state;
pub mod error;
pub mod fault;
pub mod flags;
pub mod channel;
pub mod wire;
pub mod throttle;
pub mod perf;
pub mod config;
pub mod controller;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use state::WorkerState;
pub use error::{ChannelError, ChannelResult, ConfigError, WireError, WorkerError, WorkerResult};
pub use fault::{
    format_exception, formatted_stack_trace, print_exception, BoxError, ErrorReport, FaultKind,
    FaultPhase, PanicFault, RemoteFault,
};
pub use flags::{Flag, FlagBlock, FlagStorage, HeapFlags};
pub use channel::{
    drain, is_queue_eventually_empty, is_queue_eventually_not_empty, put_log_message_into_queue,
    safe_get, Channel, ChannelFlavor, ErrorChannel, ThreadQueue,
};
pub use wire::WireCodec;
pub use throttle::IterationThrottle;
pub use perf::{PercentUseMetrics, PerformanceReport, PerformanceTracker};
pub use config::WorkerConfig;
pub use kprint::LogLevel;
pub use controller::{
    from_fn, BodyResult, ControlHandle, Controller, FnBody, Idle, LoopBody, LoopScope, RunOptions,
};
pub use env::{env_get, env_get_bool, env_get_duration_ms, env_get_opt, env_get_str, env_is_set};

/// Constants shared by both execution contexts
pub mod constants {
    /// Window used by the "eventually empty / not empty" queue helpers (ms)
    pub const QUEUE_SETTLE_WINDOW_MS: u64 = 200;

    /// Timeout used by `safe_get` (ms)
    pub const SAFE_GET_TIMEOUT_MS: u64 = 20;

    /// Sleep between polls inside the queue helpers (us)
    pub const QUEUE_POLL_INTERVAL_US: u64 = 500;

    /// Upper bound on a single framed value crossing a process boundary
    pub const MAX_FRAME_SIZE: usize = 1 << 20;

    /// Percent-use samples a performance tracker keeps; older ones are dropped
    pub const MAX_PERCENT_USE_HISTORY: usize = 4096;
}
