//! Forked process execution context
//!
//! The child is a `fork` of the supervisor: it inherits the shared flag page
//! and the pipe behind a `ProcessQueue`, runs the loop, and leaves through
//! `_exit` so none of the parent's destructors or atexit handlers run twice.
//!
//! Forking a multi-threaded process only carries the forking thread into the
//! child. Locks held by other threads at that moment stay locked in the
//! child, so worker bodies should not share mutexes with the supervisor's
//! other threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use loopvisor_core::channel::ChannelFlavor;
use loopvisor_core::error::{WorkerError, WorkerResult};
use loopvisor_core::flags::FlagStorage;
use loopvisor_core::kdebug;

use super::{ExecutionContext, ExecutionHandle};
use crate::memory::SharedPageFlags;

/// Exit status of a child whose entry point panicked
const PANIC_EXIT_STATUS: i32 = 101;

/// Runs the loop in a forked child process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessContext;

impl ExecutionContext for ProcessContext {
    type Handle = ProcessHandle;

    fn name(&self) -> &'static str {
        "process"
    }

    fn required_flavor(&self) -> ChannelFlavor {
        ChannelFlavor::CrossProcess
    }

    fn new_flags(&self) -> WorkerResult<Arc<dyn FlagStorage>> {
        Ok(Arc::new(SharedPageFlags::new()?))
    }

    fn spawn<F>(&self, name: &str, entry: F) -> WorkerResult<ProcessHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        // SAFETY: the child runs `entry` and then calls `_exit`; it never
        // returns into the caller's stack frames.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let status = match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Ok(()) => 0,
                    Err(_) => PANIC_EXIT_STATUS,
                };
                // SAFETY: terminates the child immediately.
                unsafe { libc::_exit(status) }
            }
            Ok(ForkResult::Parent { child }) => {
                kdebug!("forked process worker '{}' as pid {}", name, child);
                Ok(ProcessHandle {
                    name: name.to_string(),
                    pid: child,
                    status: None,
                })
            }
            Err(errno) => Err(WorkerError::SpawnFailed(errno.to_string())),
        }
    }
}

#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: Pid,
    status: Option<i32>,
}

impl ProcessHandle {
    #[inline]
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Exit status, once the child has been reaped
    pub fn exit_status(&self) -> Option<i32> {
        self.status
    }

    fn wait(&mut self, flags: Option<WaitPidFlag>) -> WorkerResult<Option<i32>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        loop {
            match waitpid(self.pid, flags) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.status = Some(code);
                    return Ok(Some(code));
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    let code = 128 + sig as i32;
                    self.status = Some(code);
                    return Ok(Some(code));
                }
                Ok(WaitStatus::StillAlive) => return Ok(None),
                // Stopped/continued: keep waiting for a real exit
                Ok(_) if flags.is_none() => continue,
                Ok(_) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(WorkerError::JoinFailed(errno.to_string())),
            }
        }
    }
}

impl ExecutionHandle for ProcessHandle {
    fn is_alive(&mut self) -> bool {
        matches!(self.wait(Some(WaitPidFlag::WNOHANG)), Ok(None))
    }

    fn join(&mut self) -> WorkerResult<i32> {
        match self.wait(None)? {
            Some(status) => Ok(status),
            None => Err(WorkerError::JoinFailed("child still running".to_string())),
        }
    }

    fn terminate(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }
        if signal::kill(self.pid, Signal::SIGKILL).is_err() {
            return false;
        }
        self.join().is_ok()
    }

    fn describe(&self) -> String {
        format!("process '{}' (pid {})", self.name, self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopvisor_core::flags::Flag;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_child_exit_status() {
        let mut handle = ProcessContext.spawn("lv-ok", || {}).unwrap();
        assert_eq!(handle.join().unwrap(), 0);
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_status(), Some(0));
    }

    #[test]
    fn test_child_panic_exit_status() {
        let mut handle = ProcessContext
            .spawn("lv-panic", || panic!("child blew up"))
            .unwrap();
        assert_eq!(handle.join().unwrap(), PANIC_EXIT_STATUS);
    }

    #[test]
    fn test_terminate_running_child() {
        let mut handle = ProcessContext
            .spawn("lv-sleeper", || thread::sleep(Duration::from_secs(30)))
            .unwrap();
        assert!(handle.is_alive());
        assert!(handle.describe().contains("lv-sleeper"));

        assert!(handle.terminate());
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_status(), Some(128 + libc::SIGKILL));
    }

    #[test]
    fn test_shared_flags_cross_fork() {
        let flags = ProcessContext.new_flags().unwrap();
        assert!(flags.is_process_shared());

        let child_flags = flags.clone();
        let mut handle = ProcessContext
            .spawn("lv-flags", move || child_flags.block().set(Flag::SoftStop))
            .unwrap();
        handle.join().unwrap();
        assert!(flags.block().is_set(Flag::SoftStop));
    }
}
