//! # loopvisor - supervised loop workers
//!
//! Run a body in a loop on a thread or in a forked child process, and steer
//! it from the outside: pause, resume, soft stop, hard stop. Anything the
//! body raises (an `Err` or a panic) is captured with its stack trace and
//! handed back through an error channel instead of killing the host.
//!
//! ## Features
//!
//! - **Two contexts, one loop**: `ThreadWorker` and `ProcessWorker` share the run loop
//! - **Shared flags**: stop/pause/soft-stop live on a `MAP_SHARED` page for processes
//! - **Captured faults**: `ErrorReport` keeps the trace rendered where the fault happened
//! - **Throttling**: a minimum duration per pass, with idle time tracked
//! - **Soft stop**: honoured only on passes the body leaves eligible
//!
//! ## Quick Start
//!
//! ```ignore
//! use loopvisor::{from_fn, ProcessQueue, ProcessWorker, WorkerConfig};
//!
//! let errors = ProcessQueue::error_channel()?;
//! let body = from_fn(|scope| {
//!     do_work(scope.index())?;
//!     Ok(())
//! });
//!
//! let mut worker = ProcessWorker::with_config(body, errors, WorkerConfig::from_env())?;
//! worker.start()?;
//! // ...
//! worker.pause();
//! worker.resume();
//!
//! let report = worker.hard_stop(None)?;
//! for fault in report.fatal_error_reporter {
//!     loopvisor::print_exception(&fault, "shutdown");
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        User Code                         │
//! │          LoopBody: setup / iterate / teardown            │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Controller (run loop)                  │
//! │      pause poll, fault capture, soft stop, throttle      │
//! └──────────────────────────────────────────────────────────┘
//!               │                              │
//!               ▼                              ▼
//!     ┌───────────────────┐          ┌───────────────────┐
//!     │   ThreadContext   │          │  ProcessContext   │
//!     │ heap flags        │          │ shared-page flags │
//!     │ ThreadQueue       │          │ ProcessQueue      │
//!     └───────────────────┘          └───────────────────┘
//! ```

// Re-export core types
pub use loopvisor_core::{
    // Loop
    from_fn, BodyResult, ControlHandle, Controller, FnBody, Idle, LoopBody, LoopScope, RunOptions,
    // State and errors
    ChannelError, ChannelResult, ConfigError, WireError, WorkerError, WorkerResult, WorkerState,
    // Faults
    format_exception, formatted_stack_trace, print_exception, BoxError, ErrorReport, FaultKind,
    FaultPhase, PanicFault, RemoteFault,
    // Channels
    drain, is_queue_eventually_empty, is_queue_eventually_not_empty, put_log_message_into_queue,
    safe_get, Channel, ChannelFlavor, ErrorChannel, ThreadQueue, WireCodec,
    // Flags
    Flag, FlagBlock, FlagStorage, HeapFlags,
    // Timing
    IterationThrottle, PercentUseMetrics, PerformanceReport, PerformanceTracker,
    // Config
    LogLevel, WorkerConfig,
};

// Re-export kprint macros and helpers
pub use loopvisor_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use loopvisor_core::kprint::{set_flush_enabled, set_log_level, set_pid_enabled};

// Re-export env helpers
pub use loopvisor_core::env::{env_get, env_get_bool, env_get_duration_ms, env_get_opt, env_get_str, env_is_set};

// Runtime
pub use loopvisor_runtime::{
    invoke_and_check_errors, invoke_and_check_errors_with, ExecutionContext, ExecutionHandle,
    HardStopReport, ProcessContext, ProcessQueue, ProcessWorker, SharedPageFlags, ThreadContext,
    ThreadWorker, Worker,
};
