//! The run loop
//!
//! A [`Controller`] drives a user-supplied [`LoopBody`] through
//! setup, repeated iterations, and teardown. It knows nothing about where it
//! runs: a thread worker and a forked process worker both end up calling
//! [`Controller::run`], and observe their supervisor only through the
//! [`ControlHandle`] (flag block + error channel).
//!
//! # Pass structure
//!
//! ```text
//! setup (first run only)
//! loop {
//!     wait while paused
//!     iterate                  -- fault => report + stop
//!     soft stop && eligible    => stop
//!     stopped                  => break
//!     count pass; bound hit    => break
//!     throttle
//! }
//! teardown (at most once)
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::ErrorChannel;
use crate::config::WorkerConfig;
use crate::fault::{guard_call, BoxError, ErrorReport, FaultPhase};
use crate::flags::{Flag, FlagBlock, FlagStorage};
use crate::kprint::LogLevel;
use crate::perf::{PerformanceReport, PerformanceTracker};
use crate::state::WorkerState;
use crate::throttle::IterationThrottle;
use crate::{kdebug, kerror};

/// Result of one call into user code
pub type BodyResult = Result<(), BoxError>;

/// Work performed by a worker.
///
/// Every method defaults to a no-op. Errors and panics from any of them are
/// captured and reported through the error channel; they never unwind past
/// the run loop.
pub trait LoopBody: Send + 'static {
    /// Called once, before the first iteration
    fn setup(&mut self, control: &ControlHandle) -> BodyResult {
        let _ = control;
        Ok(())
    }

    /// One loop pass
    fn iterate(&mut self, scope: &mut LoopScope<'_>) -> BodyResult {
        let _ = scope;
        Ok(())
    }

    /// Called at most once, after the last iteration
    fn teardown(&mut self, control: &ControlHandle) -> BodyResult {
        let _ = control;
        Ok(())
    }
}

/// Body that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct Idle;

impl LoopBody for Idle {}

/// Body built from an iteration closure, see [`from_fn`]
pub struct FnBody<F> {
    f: F,
}

/// Adapt an iteration closure into a [`LoopBody`] with no setup or teardown
pub fn from_fn<F>(f: F) -> FnBody<F>
where
    F: FnMut(&mut LoopScope<'_>) -> BodyResult + Send + 'static,
{
    FnBody { f }
}

impl<F> LoopBody for FnBody<F>
where
    F: FnMut(&mut LoopScope<'_>) -> BodyResult + Send + 'static,
{
    fn iterate(&mut self, scope: &mut LoopScope<'_>) -> BodyResult {
        (self.f)(scope)
    }
}

impl<F> fmt::Debug for FnBody<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnBody")
    }
}

/// What an iteration sees of its worker
pub struct LoopScope<'a> {
    index: u64,
    control: &'a ControlHandle,
    perf: &'a mut PerformanceTracker,
    soft_stop_eligible: bool,
}

impl<'a> LoopScope<'a> {
    /// Zero-based index of this pass within the current `run()`
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    pub fn control(&self) -> &ControlHandle {
        self.control
    }

    /// Do not honour a pending soft stop at the end of this pass
    pub fn hold_soft_stop(&mut self) {
        self.soft_stop_eligible = false;
    }

    pub fn allow_soft_stop(&mut self) {
        self.soft_stop_eligible = true;
    }

    #[inline]
    pub fn is_soft_stop_eligible(&self) -> bool {
        self.soft_stop_eligible
    }

    pub fn performance(&mut self) -> &mut PerformanceTracker {
        self.perf
    }
}

/// Cloneable handle onto a worker's flags and error channel.
///
/// Held by the supervisor and by the loop itself; for process workers both
/// sides point at the same shared flag page.
#[derive(Clone)]
pub struct ControlHandle {
    flags: Arc<dyn FlagStorage>,
    errors: ErrorChannel,
}

impl ControlHandle {
    pub fn new(flags: Arc<dyn FlagStorage>, errors: ErrorChannel) -> Self {
        Self { flags, errors }
    }

    #[inline]
    pub fn block(&self) -> &FlagBlock {
        self.flags.block()
    }

    /// Request a stop at the next pass boundary. Idempotent.
    ///
    /// A paused worker stays paused until resumed.
    pub fn stop(&self) {
        let block = self.block();
        block.set(Flag::Stop);
        block.transition(WorkerState::Stopped);
    }

    /// Request a stop at the next pass that is eligible for it
    pub fn soft_stop(&self) {
        let block = self.block();
        block.set(Flag::SoftStop);
        block.transition_from(&[WorkerState::Running], WorkerState::SoftStopPending);
    }

    pub fn pause(&self) {
        self.block().set(Flag::Pause);
    }

    pub fn resume(&self) {
        self.block().clear(Flag::Pause);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.block().is_set(Flag::Stop)
    }

    #[inline]
    pub fn is_preparing_for_soft_stop(&self) -> bool {
        self.block().is_set(Flag::SoftStop)
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.block().is_set(Flag::Pause)
    }

    pub fn is_start_up_complete(&self) -> bool {
        self.block().is_set(Flag::StartUpComplete)
    }

    pub fn is_teardown_complete(&self) -> bool {
        self.block().is_set(Flag::TeardownComplete)
    }

    pub fn state(&self) -> WorkerState {
        self.block().state()
    }

    /// Completed passes over the worker's lifetime
    pub fn iterations(&self) -> u64 {
        self.block().iterations()
    }

    pub fn error_channel(&self) -> &ErrorChannel {
        &self.errors
    }

    /// Whether the flags are visible across a process boundary
    pub fn is_process_shared(&self) -> bool {
        self.flags.is_process_shared()
    }
}

impl fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHandle")
            .field("flags", self.block())
            .field("channel", &self.errors.flavor())
            .finish()
    }
}

/// Switches for the setup and teardown phases of one `run_with()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub perform_setup: bool,
    pub perform_teardown: bool,
}

impl RunOptions {
    /// Setup and teardown both off
    pub const BARE: RunOptions = RunOptions {
        perform_setup: false,
        perform_teardown: false,
    };
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            perform_setup: true,
            perform_teardown: true,
        }
    }
}

/// Drives a [`LoopBody`] on the current thread
pub struct Controller {
    control: ControlHandle,
    config: WorkerConfig,
    throttle: IterationThrottle,
    perf: PerformanceTracker,
    setup_done: bool,
    setup_faulted: bool,
    teardown_done: bool,
}

impl Controller {
    pub fn new(control: ControlHandle, config: WorkerConfig) -> Self {
        Self {
            throttle: IterationThrottle::new(config.minimum_iteration_duration),
            perf: PerformanceTracker::new(config.num_longest_iterations),
            control,
            config,
            setup_done: false,
            setup_faulted: false,
            teardown_done: false,
        }
    }

    #[inline]
    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    #[inline]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.perf
    }

    pub fn reset_performance_tracker(&mut self) -> PerformanceReport {
        self.perf.reset()
    }

    /// Run with setup and teardown enabled.
    ///
    /// `None` loops until stopped. Returns the passes completed by this call.
    pub fn run<B>(&mut self, body: &mut B, num_iterations: Option<u64>) -> u64
    where
        B: LoopBody + ?Sized,
    {
        self.run_with(body, num_iterations, RunOptions::default())
    }

    pub fn run_with<B>(&mut self, body: &mut B, num_iterations: Option<u64>, opts: RunOptions) -> u64
    where
        B: LoopBody + ?Sized,
    {
        // A faulted setup is final
        if self.setup_faulted {
            return 0;
        }
        if opts.perform_setup && !self.setup_done {
            self.setup_done = true;
            let control = &self.control;
            if let Err(report) = guard_call(FaultPhase::Setup, || body.setup(control)) {
                self.setup_faulted = true;
                self.teardown_done = true;
                self.report(report);
                self.control.stop();
                return 0;
            }
        }

        let block = self.control.block();
        block.set(Flag::StartUpComplete);
        block.transition_from(&[WorkerState::Created], WorkerState::Running);
        self.log(LogLevel::Debug, format_args!("entering loop, bound {:?}", num_iterations));

        let completed = if num_iterations == Some(0) {
            0
        } else {
            self.pass_loop(body, num_iterations)
        };

        if opts.perform_teardown && !self.teardown_done {
            self.teardown_done = true;
            let control = &self.control;
            if let Err(report) = guard_call(FaultPhase::Teardown, || body.teardown(control)) {
                self.report(report);
                self.control.stop();
            }
            self.control.block().set(Flag::TeardownComplete);
        }

        self.log(LogLevel::Debug, format_args!("loop exited after {} passes", completed));
        completed
    }

    fn pass_loop<B>(&mut self, body: &mut B, num_iterations: Option<u64>) -> u64
    where
        B: LoopBody + ?Sized,
    {
        let mut completed = 0u64;
        loop {
            if self.control.is_paused() {
                self.wait_while_paused();
                if self.control.is_stopped() {
                    break;
                }
            }

            let pass_start = Instant::now();
            let mut scope = LoopScope {
                index: completed,
                control: &self.control,
                perf: &mut self.perf,
                soft_stop_eligible: true,
            };
            let result = guard_call(FaultPhase::Iteration, || body.iterate(&mut scope));
            let eligible = scope.soft_stop_eligible;

            if let Err(report) = result {
                self.report(report);
                self.control.stop();
            }
            if eligible && self.control.is_preparing_for_soft_stop() {
                self.control.stop();
            }
            if self.control.is_stopped() {
                break;
            }

            completed += 1;
            self.control.block().bump_iterations();
            if num_iterations == Some(completed) {
                break;
            }

            let iteration_time = pass_start.elapsed();
            let idle = if self.control.is_paused() {
                Duration::ZERO
            } else {
                self.throttle.pace(pass_start)
            };
            self.perf.record(iteration_time, idle);
        }
        completed
    }

    fn wait_while_paused(&self) {
        let block = self.control.block();
        block.transition_from(
            &[WorkerState::Running, WorkerState::SoftStopPending],
            WorkerState::Paused,
        );
        self.log(LogLevel::Debug, format_args!("paused"));

        while block.is_set(Flag::Pause) {
            thread::sleep(self.config.pause_poll_interval);
        }

        let next = if block.is_set(Flag::SoftStop) {
            WorkerState::SoftStopPending
        } else {
            WorkerState::Running
        };
        block.transition_from(&[WorkerState::Paused], next);
        self.log(LogLevel::Debug, format_args!("resumed"));
    }

    fn report(&self, report: ErrorReport) {
        self.log(LogLevel::Error, format_args!("{}", report));
        self.log(LogLevel::Debug, format_args!("{}", report.formatted_stack_trace()));
        if let Err(e) = self.control.error_channel().put(report) {
            kerror!("could not put fault on error channel: {}", e);
        }
    }

    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.config.logging_level.allows(level) {
            return;
        }
        match level {
            LogLevel::Error => kerror!("{}", args),
            _ => kdebug!("{}", args),
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("control", &self.control)
            .field("minimum_iteration_duration", &self.throttle.minimum())
            .field("setup_done", &self.setup_done)
            .field("setup_faulted", &self.setup_faulted)
            .field("teardown_done", &self.teardown_done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ThreadQueue};
    use crate::error::ChannelError;
    use crate::fault::FaultKind;
    use crate::flags::HeapFlags;

    fn controller(minimum: Duration) -> (Controller, ThreadQueue<ErrorReport>) {
        let queue = ThreadQueue::new();
        let control = ControlHandle::new(Arc::new(HeapFlags::new()), Arc::new(queue.clone()));
        let config = WorkerConfig::new()
            .minimum_iteration_duration(minimum)
            .pause_poll_interval(Duration::from_millis(1))
            .logging_level(LogLevel::Off);
        (Controller::new(control, config), queue)
    }

    #[derive(Default)]
    struct Counting {
        setups: u32,
        passes: u32,
        teardowns: u32,
        fail_setup: bool,
        fail_at: Option<u64>,
        panic_in_teardown: bool,
    }

    impl LoopBody for Counting {
        fn setup(&mut self, _control: &ControlHandle) -> BodyResult {
            self.setups += 1;
            if self.fail_setup {
                return Err("setup failed".into());
            }
            Ok(())
        }

        fn iterate(&mut self, scope: &mut LoopScope<'_>) -> BodyResult {
            if self.fail_at == Some(scope.index()) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "pass failed").into());
            }
            self.passes += 1;
            Ok(())
        }

        fn teardown(&mut self, _control: &ControlHandle) -> BodyResult {
            self.teardowns += 1;
            if self.panic_in_teardown {
                panic!("teardown exploded");
            }
            Ok(())
        }
    }

    #[test]
    fn test_bounded_run() {
        let (mut ctl, queue) = controller(Duration::ZERO);
        let mut body = Counting::default();

        assert_eq!(ctl.run(&mut body, Some(5)), 5);
        assert_eq!((body.setups, body.passes, body.teardowns), (1, 5, 1));
        assert_eq!(ctl.control().iterations(), 5);
        assert!(queue.is_empty());

        // Bound reached without a stop request
        assert!(!ctl.control().is_stopped());
        assert_eq!(ctl.control().state(), WorkerState::Running);
        assert!(ctl.control().is_start_up_complete());
        assert!(ctl.control().is_teardown_complete());
    }

    #[test]
    fn test_zero_iterations() {
        let (mut ctl, _queue) = controller(Duration::ZERO);
        let mut body = Counting::default();
        assert_eq!(ctl.run(&mut body, Some(0)), 0);
        assert_eq!((body.setups, body.passes, body.teardowns), (1, 0, 1));
    }

    #[test]
    fn test_iteration_fault_is_reported_once() {
        let (mut ctl, queue) = controller(Duration::ZERO);
        let mut body = Counting {
            fail_at: Some(2),
            ..Default::default()
        };

        assert_eq!(ctl.run(&mut body, None), 2);
        assert_eq!(body.teardowns, 1);
        assert_eq!(ctl.control().state(), WorkerState::Stopped);

        let report = queue.get_nowait().unwrap();
        assert_eq!(queue.get_nowait().unwrap_err(), ChannelError::Empty);
        assert_eq!(report.phase(), FaultPhase::Iteration);
        assert_eq!(report.kind(), FaultKind::Error);
        assert!(report.formatted_stack_trace().contains("pass failed"));

        let original = report.into_error().downcast::<std::io::Error>().unwrap();
        assert_eq!(original.to_string(), "pass failed");
    }

    #[test]
    fn test_setup_fault_skips_loop_and_teardown() {
        let (mut ctl, queue) = controller(Duration::ZERO);
        let mut body = Counting {
            fail_setup: true,
            ..Default::default()
        };

        assert_eq!(ctl.run(&mut body, Some(3)), 0);
        assert_eq!((body.passes, body.teardowns), (0, 0));
        assert!(ctl.control().is_stopped());
        assert!(!ctl.control().is_start_up_complete());
        assert_eq!(queue.get_nowait().unwrap().phase(), FaultPhase::Setup);
    }

    #[test]
    fn test_setup_fault_is_final() {
        let (mut ctl, queue) = controller(Duration::ZERO);
        let mut body = Counting {
            fail_setup: true,
            ..Default::default()
        };

        assert_eq!(ctl.run(&mut body, Some(3)), 0);
        assert_eq!(ctl.run(&mut body, None), 0);
        assert_eq!(
            ctl.run_with(&mut body, Some(2), RunOptions { perform_setup: false, perform_teardown: true }),
            0
        );

        assert_eq!((body.setups, body.passes, body.teardowns), (1, 0, 0));
        assert_eq!(ctl.control().iterations(), 0);
        assert!(!ctl.control().is_teardown_complete());
        assert_eq!(queue.get_nowait().unwrap().phase(), FaultPhase::Setup);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_teardown_panic_is_captured() {
        let (mut ctl, queue) = controller(Duration::ZERO);
        let mut body = Counting {
            panic_in_teardown: true,
            ..Default::default()
        };

        ctl.run(&mut body, Some(1));
        let report = queue.get_nowait().unwrap();
        assert_eq!(report.phase(), FaultPhase::Teardown);
        assert_eq!(report.kind(), FaultKind::Panic);
        assert_eq!(report.message(), "teardown exploded");
        assert!(ctl.control().is_teardown_complete());
    }

    #[test]
    fn test_setup_and_teardown_at_most_once() {
        let (mut ctl, _queue) = controller(Duration::ZERO);
        let mut body = Counting::default();
        ctl.run(&mut body, Some(2));
        ctl.run(&mut body, Some(2));
        assert_eq!((body.setups, body.passes, body.teardowns), (1, 4, 1));
        assert_eq!(ctl.control().iterations(), 4);
    }

    #[test]
    fn test_run_options_skip_phases() {
        let (mut ctl, _queue) = controller(Duration::ZERO);
        let mut body = Counting::default();
        ctl.run_with(&mut body, Some(3), RunOptions::BARE);
        assert_eq!((body.setups, body.passes, body.teardowns), (0, 3, 0));
        assert!(!ctl.control().is_teardown_complete());
    }

    #[test]
    fn test_soft_stop_at_pass_boundary() {
        let (mut ctl, queue) = controller(Duration::ZERO);
        let mut body = from_fn(|scope| {
            if scope.index() == 2 {
                scope.control().soft_stop();
            }
            Ok(())
        });

        assert_eq!(ctl.run(&mut body, None), 2);
        assert_eq!(ctl.control().state(), WorkerState::Stopped);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_soft_stop_waits_for_eligible_pass() {
        let (mut ctl, _queue) = controller(Duration::ZERO);
        ctl.control().block().transition(WorkerState::Running);
        ctl.control().soft_stop();
        assert_eq!(ctl.control().state(), WorkerState::SoftStopPending);

        let mut body = from_fn(|scope| {
            if scope.index() < 4 {
                scope.hold_soft_stop();
            }
            Ok(())
        });
        assert_eq!(ctl.run(&mut body, None), 4);
        assert!(ctl.control().is_stopped());
    }

    #[test]
    fn test_never_eligible_ignores_soft_stop() {
        let (mut ctl, _queue) = controller(Duration::ZERO);
        ctl.control().soft_stop();

        let mut body = from_fn(|scope| {
            scope.hold_soft_stop();
            Ok(())
        });
        assert_eq!(ctl.run(&mut body, Some(10)), 10);
        assert!(!ctl.control().is_stopped());
    }

    #[test]
    fn test_throttle_pads_passes() {
        let (mut ctl, _queue) = controller(Duration::from_millis(5));
        let start = Instant::now();
        ctl.run(&mut Idle, Some(4));

        // The final pass exits before the throttle
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(ctl.performance().idle_time() > Duration::from_millis(10));

        let report = ctl.reset_performance_tracker();
        assert_eq!(report.longest_iterations.len(), 3);
        assert!(report.percent_use < 50.0);
    }

    #[test]
    fn test_pause_and_resume_from_another_thread() {
        let (mut ctl, _queue) = controller(Duration::from_millis(1));
        let control = ctl.control().clone();
        control.pause();

        let handle = thread::spawn(move || ctl.run(&mut Idle, None));

        thread::sleep(Duration::from_millis(30));
        assert_eq!(control.iterations(), 0);
        assert_eq!(control.state(), WorkerState::Paused);
        assert!(control.is_start_up_complete());

        control.resume();
        let deadline = Instant::now() + Duration::from_secs(2);
        while control.iterations() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(control.iterations() >= 3);
        assert_eq!(control.state(), WorkerState::Running);

        control.stop();
        handle.join().unwrap();
        assert!(control.is_teardown_complete());
    }

    #[test]
    fn test_stop_while_paused_needs_resume() {
        let (mut ctl, _queue) = controller(Duration::ZERO);
        let control = ctl.control().clone();
        control.pause();
        control.stop();

        let handle = thread::spawn(move || ctl.run(&mut Idle, None));
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        control.resume();
        assert_eq!(handle.join().unwrap(), 0);
    }
}
