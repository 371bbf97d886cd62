//! Thread execution context

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use loopvisor_core::channel::ChannelFlavor;
use loopvisor_core::error::{WorkerError, WorkerResult};
use loopvisor_core::flags::{FlagStorage, HeapFlags};

use super::{ExecutionContext, ExecutionHandle};

/// Runs the loop on a named OS thread of this process
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadContext;

impl ExecutionContext for ThreadContext {
    type Handle = ThreadHandle;

    fn name(&self) -> &'static str {
        "thread"
    }

    fn required_flavor(&self) -> ChannelFlavor {
        ChannelFlavor::InProcess
    }

    fn new_flags(&self) -> WorkerResult<Arc<dyn FlagStorage>> {
        Ok(Arc::new(HeapFlags::new()))
    }

    fn spawn<F>(&self, name: &str, entry: F) -> WorkerResult<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(entry)
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(ThreadHandle {
            name: name.to_string(),
            handle: Some(handle),
            status: None,
        })
    }
}

#[derive(Debug)]
pub struct ThreadHandle {
    name: String,
    handle: Option<JoinHandle<()>>,
    status: Option<i32>,
}

impl ExecutionHandle for ThreadHandle {
    fn is_alive(&mut self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn join(&mut self) -> WorkerResult<i32> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let handle = self.handle.take().ok_or(WorkerError::NotStarted)?;
        // The run loop catches everything raised by user code, so a panic
        // here came from the loop itself.
        let status = match handle.join() {
            Ok(()) => 0,
            Err(_) => 1,
        };
        self.status = Some(status);
        Ok(status)
    }

    fn terminate(&mut self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("thread '{}'", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_spawn_and_join() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut handle = ThreadContext
            .spawn("lv-test", move || {
                assert_eq!(thread::current().name(), Some("lv-test"));
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(handle.join().unwrap(), 0);
        assert!(ran.load(Ordering::SeqCst));
        assert!(!handle.is_alive());
        // Joining twice returns the cached status
        assert_eq!(handle.join().unwrap(), 0);
        assert_eq!(handle.describe(), "thread 'lv-test'");
    }

    #[test]
    fn test_is_alive_while_running() {
        let mut handle = ThreadContext
            .spawn("lv-sleeper", || thread::sleep(Duration::from_millis(50)))
            .unwrap();
        assert!(handle.is_alive());
        assert!(!handle.terminate());
        handle.join().unwrap();
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_flags_are_process_local() {
        let flags = ThreadContext.new_flags().unwrap();
        assert!(!flags.is_process_shared());
        assert_eq!(ThreadContext.required_flavor(), ChannelFlavor::InProcess);
    }
}
