//! Workers
//!
//! A [`Worker`] pairs a [`LoopBody`] with an [`ExecutionContext`]. It can
//! be driven inline with [`Worker::run`] (on the caller's thread, any
//! channel flavor) or launched with [`Worker::start`], after which the
//! supervisor steers it through its [`ControlHandle`].
//!
//! ```text
//! new ──> start ──> [pause <-> resume] ──> stop / soft_stop ──> join
//!           │                                                    │
//!           └── hard_stop: resume + stop + join + drain errors ──┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use loopvisor_core::channel::{drain, ErrorChannel};
use loopvisor_core::config::WorkerConfig;
use loopvisor_core::controller::{ControlHandle, Controller, LoopBody, RunOptions};
use loopvisor_core::error::{WorkerError, WorkerResult};
use loopvisor_core::fault::{BoxError, ErrorReport};
use loopvisor_core::kprint::LogLevel;
use loopvisor_core::perf::{PerformanceReport, PerformanceTracker};
use loopvisor_core::state::WorkerState;
use loopvisor_core::{kerror, kinfo, kwarn};

use crate::context::{ExecutionContext, ExecutionHandle, ThreadContext};

#[cfg(unix)]
use crate::context::ProcessContext;

/// Worker running its loop on a thread of this process
pub type ThreadWorker<B> = Worker<B, ThreadContext>;

/// Worker running its loop in a forked child process
#[cfg(unix)]
pub type ProcessWorker<B> = Worker<B, ProcessContext>;

/// How long `Drop` waits for a live worker when no hard-stop timeout is set
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a worker to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(0);

/// What `hard_stop()` found
#[derive(Debug)]
pub struct HardStopReport {
    /// Every fault left on the error channel, oldest first
    pub fatal_error_reporter: Vec<ErrorReport>,
    /// Whether the worker exited within the timeout
    pub joined: bool,
}

pub struct Worker<B: LoopBody, C: ExecutionContext> {
    name: String,
    context: C,
    config: WorkerConfig,
    control: ControlHandle,
    driver: Option<(Controller, B)>,
    handle: Option<C::Handle>,
}

impl<B: LoopBody, C: ExecutionContext + Default> Worker<B, C> {
    /// Create a worker configured from the environment
    pub fn new(body: B, errors: ErrorChannel) -> WorkerResult<Self> {
        Self::with_config(body, errors, WorkerConfig::from_env())
    }

    pub fn with_config(body: B, errors: ErrorChannel, config: WorkerConfig) -> WorkerResult<Self> {
        Self::with_context(C::default(), body, errors, config)
    }
}

impl<B: LoopBody, C: ExecutionContext> Worker<B, C> {
    pub fn with_context(
        context: C,
        body: B,
        errors: ErrorChannel,
        config: WorkerConfig,
    ) -> WorkerResult<Self> {
        config.validate()?;

        let control = ControlHandle::new(context.new_flags()?, errors);
        let controller = Controller::new(control.clone(), config.clone());
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);

        Ok(Self {
            name: format!("lv-{}-{}", context.name(), id),
            context,
            config,
            control,
            driver: Some((controller, body)),
            handle: None,
        })
    }

    /// Rename the worker (thread name / log tag)
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch the loop in a new execution unit.
    ///
    /// Fails with [`WorkerError::BadChannelType`] before anything is launched
    /// if the error channel cannot carry faults out of this context.
    pub fn start(&mut self) -> WorkerResult<()> {
        let required = self.context.required_flavor();
        let found = self.control.error_channel().flavor();
        if required != found {
            return Err(WorkerError::BadChannelType {
                context: self.context.name(),
                required,
                found,
            });
        }

        let (mut controller, mut body) = self.driver.take().ok_or(WorkerError::AlreadyStarted)?;
        let handle = self.context.spawn(&self.name, move || {
            controller.run(&mut body, None);
        })?;

        self.log(LogLevel::Info, format_args!("started {}", handle.describe()));
        self.handle = Some(handle);
        Ok(())
    }

    /// Run the loop on the calling thread with setup and teardown enabled
    pub fn run(&mut self, num_iterations: Option<u64>) -> WorkerResult<u64> {
        self.run_with(num_iterations, RunOptions::default())
    }

    pub fn run_with(&mut self, num_iterations: Option<u64>, opts: RunOptions) -> WorkerResult<u64> {
        let (controller, body) = self.driver.as_mut().ok_or(WorkerError::AlreadyStarted)?;
        Ok(controller.run_with(body, num_iterations, opts))
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// The body, while it has not been moved into a started worker
    pub fn body(&self) -> Option<&B> {
        self.driver.as_ref().map(|(_, body)| body)
    }

    pub fn body_mut(&mut self) -> Option<&mut B> {
        self.driver.as_mut().map(|(_, body)| body)
    }

    /// Performance of inline runs; `None` once started
    pub fn performance(&self) -> Option<&PerformanceTracker> {
        self.driver.as_ref().map(|(controller, _)| controller.performance())
    }

    pub fn reset_performance_tracker(&mut self) -> Option<PerformanceReport> {
        self.driver
            .as_mut()
            .map(|(controller, _)| controller.reset_performance_tracker())
    }

    #[inline]
    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn minimum_iteration_duration(&self) -> Duration {
        self.config.minimum_iteration_duration
    }

    pub fn logging_level(&self) -> LogLevel {
        self.config.logging_level
    }

    pub fn error_channel(&self) -> &ErrorChannel {
        self.control.error_channel()
    }

    pub fn handle(&self) -> Option<&C::Handle> {
        self.handle.as_ref()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn soft_stop(&self) {
        self.control.soft_stop();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    pub fn is_preparing_for_soft_stop(&self) -> bool {
        self.control.is_preparing_for_soft_stop()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_start_up_complete(&self) -> bool {
        self.control.is_start_up_complete()
    }

    pub fn is_teardown_complete(&self) -> bool {
        self.control.is_teardown_complete()
    }

    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    pub fn iterations(&self) -> u64 {
        self.control.iterations()
    }

    pub fn is_alive(&mut self) -> bool {
        self.handle.as_mut().is_some_and(|h| h.is_alive())
    }

    /// Wait for the started worker to exit.
    ///
    /// A worker that faulted still exits with status 0; check the error
    /// channel for what went wrong.
    pub fn join(&mut self) -> WorkerResult<i32> {
        self.handle.as_mut().ok_or(WorkerError::NotStarted)?.join()
    }

    /// Stop the worker, wait for it, and collect every queued fault.
    ///
    /// A paused worker is resumed first so it can observe the stop. The wait
    /// is bounded by `timeout`, falling back to the configured
    /// `hard_stop_timeout`; with neither it waits until the worker exits.
    pub fn hard_stop(&mut self, timeout: Option<Duration>) -> WorkerResult<HardStopReport> {
        self.control.resume();
        self.control.stop();

        let joined = match self.handle.as_mut() {
            None => true,
            Some(handle) => match timeout.or(self.config.hard_stop_timeout) {
                None => {
                    handle.join()?;
                    true
                }
                Some(limit) => {
                    if wait_for_exit(handle, limit) {
                        handle.join()?;
                        true
                    } else {
                        false
                    }
                }
            },
        };
        if !joined {
            self.log(LogLevel::Warn, format_args!("{} did not exit in time", self.describe()));
        }

        Ok(HardStopReport {
            fatal_error_reporter: drain(self.control.error_channel().as_ref()),
            joined,
        })
    }

    pub fn describe(&self) -> String {
        match &self.handle {
            Some(handle) => handle.describe(),
            None => format!("{} worker '{}' (not started)", self.context.name(), self.name),
        }
    }

    fn log(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        if !self.config.logging_level.allows(level) {
            return;
        }
        match level {
            LogLevel::Error => kerror!("{}", args),
            LogLevel::Warn => kwarn!("{}", args),
            _ => kinfo!("{}", args),
        }
    }
}

impl<B: LoopBody, C: ExecutionContext> Drop for Worker<B, C> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        if !handle.is_alive() {
            let _ = handle.join();
            return;
        }

        self.control.resume();
        self.control.stop();
        let limit = self.config.hard_stop_timeout.unwrap_or(DROP_JOIN_TIMEOUT);
        if wait_for_exit(handle, limit) {
            let _ = handle.join();
        } else if handle.terminate() {
            kwarn!("killed {} after {:?}", handle.describe(), limit);
        } else {
            kwarn!("{} still running after {:?}, detaching", handle.describe(), limit);
        }
    }
}

impl<B: LoopBody, C: ExecutionContext> std::fmt::Debug for Worker<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("context", &self.context.name())
            .field("control", &self.control)
            .field("started", &self.is_started())
            .finish()
    }
}

fn wait_for_exit<H: ExecutionHandle>(handle: &mut H, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while handle.is_alive() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
    true
}

/// Run `worker` inline for `num_iterations` passes, setup and teardown off,
/// then surface the first captured fault as an error.
///
/// The returned error is the one the body raised (or a `RemoteFault` for
/// faults that crossed a process boundary), not a wrapper.
pub fn invoke_and_check_errors<B, C>(worker: &mut Worker<B, C>, num_iterations: u64) -> Result<(), BoxError>
where
    B: LoopBody,
    C: ExecutionContext,
{
    invoke_and_check_errors_with(worker, num_iterations, RunOptions::BARE)
}

pub fn invoke_and_check_errors_with<B, C>(
    worker: &mut Worker<B, C>,
    num_iterations: u64,
    opts: RunOptions,
) -> Result<(), BoxError>
where
    B: LoopBody,
    C: ExecutionContext,
{
    worker.run_with(Some(num_iterations), opts)?;
    match worker.error_channel().get_nowait() {
        Ok(report) => {
            worker.log(LogLevel::Error, format_args!("{}", report.formatted_stack_trace()));
            Err(report.into_error())
        }
        Err(_) => Ok(()),
    }
}
