//! Worker lifecycle state

use core::fmt;

/// State of a worker
///
/// Stored as a `u8` inside the shared [`FlagBlock`](crate::flags::FlagBlock)
/// so a supervisor can read it from the other side of a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Constructed, loop not entered yet
    Created = 0,

    /// Inside the run loop
    Running = 1,

    /// Waiting for `resume()`; no iteration work is performed
    Paused = 2,

    /// `soft_stop()` requested, waiting for an eligible pass boundary
    SoftStopPending = 3,

    /// Terminal
    Stopped = 4,
}

impl WorkerState {
    /// Check if no further transition may leave this state
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped)
    }

    /// Check if the loop has been entered and not yet stopped
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            WorkerState::Running | WorkerState::Paused | WorkerState::SoftStopPending
        )
    }
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Paused,
            3 => WorkerState::SoftStopPending,
            _ => WorkerState::Stopped,
        }
    }
}

impl From<WorkerState> for u8 {
    fn from(state: WorkerState) -> u8 {
        state as u8
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Created => write!(f, "CREATED"),
            WorkerState::Running => write!(f, "RUNNING"),
            WorkerState::Paused => write!(f, "PAUSED"),
            WorkerState::SoftStopPending => write!(f, "SOFT_STOP_PENDING"),
            WorkerState::Stopped => write!(f, "STOPPED"),
        }
    }
}
