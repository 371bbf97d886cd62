//! # loopvisor-runtime
//!
//! Platform-specific pieces for loopvisor workers.
//!
//! This crate provides:
//! - Execution contexts: threads, and forked processes on unix
//! - Shared-page flag storage for process workers (mmap)
//! - A pipe-backed cross-process queue
//! - `Worker`, tying a `LoopBody` to an execution context

pub mod context;
pub mod memory;
pub mod worker;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod pipe_queue;

        pub use context::{ProcessContext, ProcessHandle};
        pub use memory::SharedPageFlags;
        pub use pipe_queue::ProcessQueue;
        pub use worker::ProcessWorker;
    } else {
        compile_error!("loopvisor-runtime currently supports unix targets only");
    }
}

// Re-exports
pub use context::{ExecutionContext, ExecutionHandle, ThreadContext, ThreadHandle};
pub use worker::{
    invoke_and_check_errors, invoke_and_check_errors_with, HardStopReport, ThreadWorker, Worker,
};
