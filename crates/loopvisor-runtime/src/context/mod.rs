//! Execution contexts
//!
//! A worker's run loop is the same everywhere; what differs is where it
//! executes and how its supervisor reaches it. An [`ExecutionContext`]
//! supplies the three things that vary:
//!
//! - flag storage both sides can see ([`ExecutionContext::new_flags`])
//! - the channel flavor faults must travel through
//! - how the loop is launched, observed and reclaimed ([`ExecutionHandle`])

use std::sync::Arc;

use loopvisor_core::channel::ChannelFlavor;
use loopvisor_core::error::WorkerResult;
use loopvisor_core::flags::FlagStorage;

mod thread;
pub use thread::{ThreadContext, ThreadHandle};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod process;
        pub use process::{ProcessContext, ProcessHandle};
    }
}

/// Where a worker's loop runs
pub trait ExecutionContext: Send + Sync + 'static {
    type Handle: ExecutionHandle;

    /// Short name used in errors and logs ("thread", "process")
    fn name(&self) -> &'static str;

    /// Channel flavor the error channel must have
    fn required_flavor(&self) -> ChannelFlavor;

    /// Allocate flag storage visible to both sides of this context
    fn new_flags(&self) -> WorkerResult<Arc<dyn FlagStorage>>;

    /// Launch `entry` in a new execution unit named `name`
    fn spawn<F>(&self, name: &str, entry: F) -> WorkerResult<Self::Handle>
    where
        F: FnOnce() + Send + 'static;
}

/// Supervisor-side handle on a launched execution unit
pub trait ExecutionHandle: Send {
    /// Whether the unit is still executing
    fn is_alive(&mut self) -> bool;

    /// Wait for the unit to finish and return its exit status
    fn join(&mut self) -> WorkerResult<i32>;

    /// Forcibly end the unit, if the context supports it.
    ///
    /// Returns false when it cannot be done (threads cannot be killed).
    fn terminate(&mut self) -> bool;

    /// Human-readable identity (thread name, pid)
    fn describe(&self) -> String;
}
