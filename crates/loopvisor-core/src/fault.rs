//! Captured faults
//!
//! Anything that goes wrong inside `setup`, an iteration, or `teardown`
//! (a returned `Err` or a panic) is caught at the call site and turned into
//! an [`ErrorReport`]. The stack trace is rendered right there: once the
//! report has crossed a process boundary the unwinding information is gone.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::error::WireError;
use crate::kprintln;

/// Boxed error returned by user code
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where in the lifecycle a fault was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultPhase {
    Setup = 0,
    Iteration = 1,
    Teardown = 2,
}

impl FaultPhase {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(FaultPhase::Setup),
            1 => Ok(FaultPhase::Iteration),
            2 => Ok(FaultPhase::Teardown),
            other => Err(WireError::InvalidTag(other)),
        }
    }
}

impl fmt::Display for FaultPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultPhase::Setup => write!(f, "setup"),
            FaultPhase::Iteration => write!(f, "iteration"),
            FaultPhase::Teardown => write!(f, "teardown"),
        }
    }
}

/// How the fault surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultKind {
    /// User code returned `Err`
    Error = 0,
    /// User code panicked
    Panic = 1,
}

impl FaultKind {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(FaultKind::Error),
            1 => Ok(FaultKind::Panic),
            other => Err(WireError::InvalidTag(other)),
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Error => write!(f, "error"),
            FaultKind::Panic => write!(f, "panic"),
        }
    }
}

/// Error value standing in for a caught panic payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicFault {
    message: String,
}

impl PanicFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PanicFault {}

/// Error rebuilt on the supervisor side of a process boundary.
///
/// Keeps the `Display` and `Debug` renderings of the error raised in the
/// child, so callers see the same text they would have seen in-process.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteFault {
    message: String,
    detail: String,
}

impl RemoteFault {
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: detail.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// `Debug` rendering of the original error
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

impl std::error::Error for RemoteFault {}

/// A captured fault plus the stack trace rendered where it was caught.
#[derive(Debug)]
pub struct ErrorReport {
    phase: FaultPhase,
    kind: FaultKind,
    error: BoxError,
    trace: String,
}

impl ErrorReport {
    /// Build a report, capturing the current stack.
    ///
    /// Must be called at the catch site.
    pub fn capture(phase: FaultPhase, kind: FaultKind, error: BoxError) -> Self {
        let backtrace = Backtrace::force_capture();
        let trace = format!("{}\n  {} {}: {:?}", backtrace, phase, kind, error);
        Self {
            phase,
            kind,
            error,
            trace,
        }
    }

    /// Reassemble a report from already-rendered parts (wire decoding).
    pub fn from_parts(phase: FaultPhase, kind: FaultKind, error: BoxError, trace: String) -> Self {
        Self {
            phase,
            kind,
            error,
            trace,
        }
    }

    #[inline]
    pub fn phase(&self) -> FaultPhase {
        self.phase
    }

    #[inline]
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// `Display` text of the original error
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn formatted_stack_trace(&self) -> &str {
        &self.trace
    }

    /// Give back the original error, dropping the trace.
    pub fn into_error(self) -> BoxError {
        self.error
    }

    pub fn into_parts(self) -> (BoxError, String) {
        (self.error, self.trace)
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault ({}): {}", self.phase, self.kind, self.error)
    }
}

/// Run one call into user code, converting `Err` and panics into a report.
pub fn guard_call<F>(phase: FaultPhase, f: F) -> Result<(), ErrorReport>
where
    F: FnOnce() -> Result<(), BoxError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(ErrorReport::capture(phase, FaultKind::Error, error)),
        Err(payload) => {
            let error = PanicFault::new(panic_message(payload.as_ref()));
            Err(ErrorReport::capture(phase, FaultKind::Panic, Box::new(error)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Stack trace rendered when the fault was caught
pub fn formatted_stack_trace(report: &ErrorReport) -> &str {
    report.formatted_stack_trace()
}

const FATAL_BANNER: &str = "IMPORTANT: This fatal error message is being printed to the console \
before attempting to be logged. Confirm it is in the log file before closing the console. \
Screenshot or copy the console to save the error if it is not in the log!";

/// Render the fatal-error message `print_exception` emits.
///
/// The type line is the error's `Debug` text, e.g. `ValueError("boom")`.
/// Faults received from a child process show the detail captured there.
pub fn format_exception(report: &ErrorReport, call_id: impl fmt::Display) -> String {
    format!(
        "{}\nID of call to print: {}\n{} {}: {}\nException type: {:?}\n{}",
        FATAL_BANNER,
        call_id,
        report.phase(),
        report.kind(),
        report.message(),
        report.error(),
        report.formatted_stack_trace()
    )
}

/// Print a fatal error to stderr ahead of any other logging.
pub fn print_exception(report: &ErrorReport, call_id: impl fmt::Display) {
    kprintln!("{}", format_exception(report, call_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_call_ok() {
        assert!(guard_call(FaultPhase::Setup, || Ok(())).is_ok());
    }

    #[test]
    fn test_guard_call_error_keeps_original() {
        let report = guard_call(FaultPhase::Iteration, || {
            let n: u32 = "nope".parse()?;
            let _ = n;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(report.phase(), FaultPhase::Iteration);
        assert_eq!(report.kind(), FaultKind::Error);
        assert!(report.formatted_stack_trace().contains("iteration error: ParseIntError"));

        let original = report.into_error();
        assert!(original.downcast::<std::num::ParseIntError>().is_ok());
    }

    #[test]
    fn test_guard_call_panic() {
        let report = guard_call(FaultPhase::Teardown, || panic!("test message")).unwrap_err();
        assert_eq!(report.kind(), FaultKind::Panic);
        assert_eq!(report.message(), "test message");
        assert!(report.formatted_stack_trace().contains("teardown panic"));

        let formatted = guard_call(FaultPhase::Setup, || panic!("code {}", 7)).unwrap_err();
        assert_eq!(formatted.message(), "code 7");
    }

    #[test]
    fn test_remote_fault_renders_like_original() {
        let remote = RemoteFault::new("test message", "ValueError(\"test message\")");
        assert_eq!(remote.to_string(), "test message");
        assert_eq!(format!("{:?}", remote), "ValueError(\"test message\")");
    }

    #[test]
    fn test_format_exception_includes_call_id() {
        let report = ErrorReport::capture(
            FaultPhase::Iteration,
            FaultKind::Error,
            Box::new(PanicFault::new("boom")),
        );
        let text = format_exception(&report, "call-1234");
        assert!(text.starts_with("IMPORTANT"));
        assert!(text.contains("ID of call to print: call-1234"));
        assert!(text.contains("iteration error: boom\nException type: PanicFault { message: \"boom\" }\n"));
        assert!(text.ends_with(report.formatted_stack_trace()));
    }

    #[test]
    fn test_format_exception_shows_remote_detail() {
        let report = ErrorReport::from_parts(
            FaultPhase::Setup,
            FaultKind::Error,
            Box::new(RemoteFault::new("bad value", "ValueError(\"bad value\")")),
            "trace".to_string(),
        );
        let text = format_exception(&report, 7);
        assert!(text.contains("setup error: bad value\nException type: ValueError(\"bad value\")\ntrace"));
    }

    #[test]
    fn test_tags_round_trip() {
        assert_eq!(FaultPhase::from_u8(FaultPhase::Teardown as u8), Ok(FaultPhase::Teardown));
        assert_eq!(FaultKind::from_u8(3), Err(WireError::InvalidTag(3)));
    }
}
