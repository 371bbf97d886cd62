//! Stop/pause/soft-stop flags shared between a worker and its supervisor
//!
//! All cross-boundary control state lives in one [`FlagBlock`]: a bitset of
//! [`Flag`]s, the [`WorkerState`], and the iteration counter. The block is
//! only atomics, so it works the same whether it sits on the heap (thread
//! workers) or on a `MAP_SHARED` page inherited across `fork` (process
//! workers). Where it lives is decided by a [`FlagStorage`] implementation.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::state::WorkerState;

/// Individual control flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Flag {
    /// Hard stop requested or the worker faulted
    Stop = 1 << 0,
    /// Stop at the next eligible pass boundary
    SoftStop = 1 << 1,
    /// Skip iteration work until cleared
    Pause = 1 << 2,
    /// Set right before the loop is entered
    StartUpComplete = 1 << 3,
    /// Set once teardown has been attempted
    TeardownComplete = 1 << 4,
}

impl Flag {
    #[inline]
    const fn bit(self) -> u32 {
        self as u32
    }
}

/// Control block shared by worker and supervisor
///
/// Layout is `repr(C)` and cache-line aligned; it is placed verbatim on a
/// shared page for process workers.
#[repr(C, align(64))]
pub struct FlagBlock {
    flags: AtomicU32,
    state: AtomicU8,
    _pad: [u8; 3],
    iterations: AtomicU64,
}

impl FlagBlock {
    pub const fn new() -> Self {
        Self {
            flags: AtomicU32::new(0),
            state: AtomicU8::new(WorkerState::Created as u8),
            _pad: [0; 3],
            iterations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn set(&self, flag: Flag) {
        self.flags.fetch_or(flag.bit(), Ordering::AcqRel);
    }

    #[inline]
    pub fn clear(&self, flag: Flag) {
        self.flags.fetch_and(!flag.bit(), Ordering::AcqRel);
    }

    #[inline]
    pub fn is_set(&self, flag: Flag) -> bool {
        self.flags.load(Ordering::Acquire) & flag.bit() != 0
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` from any non-terminal state.
    ///
    /// Returns false if the worker is already `Stopped`.
    pub fn transition(&self, to: WorkerState) -> bool {
        self.transition_if(to, |_| true)
    }

    /// Move to `to` only if the current state is one of `from`.
    pub fn transition_from(&self, from: &[WorkerState], to: WorkerState) -> bool {
        self.transition_if(to, |current| from.contains(&current))
    }

    fn transition_if(&self, to: WorkerState, allowed: impl Fn(WorkerState) -> bool) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = WorkerState::from(current);
            if state.is_terminal() || !allowed(state) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Completed iterations over the worker's lifetime
    #[inline]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn bump_iterations(&self) -> u64 {
        self.iterations.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for FlagBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlagBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagBlock")
            .field("state", &self.state())
            .field("stop", &self.is_set(Flag::Stop))
            .field("soft_stop", &self.is_set(Flag::SoftStop))
            .field("pause", &self.is_set(Flag::Pause))
            .field("iterations", &self.iterations())
            .finish()
    }
}

/// Backing storage for a worker's [`FlagBlock`]
///
/// Thread workers use [`HeapFlags`]; process workers need storage that
/// survives `fork` as the *same* memory, not a copy.
pub trait FlagStorage: Send + Sync {
    fn block(&self) -> &FlagBlock;

    /// Whether writes are visible across a process boundary
    fn is_process_shared(&self) -> bool;
}

/// Heap-allocated flags, visible to threads of one process only
#[derive(Debug, Default)]
pub struct HeapFlags {
    block: FlagBlock,
}

impl HeapFlags {
    pub fn new() -> Self {
        Self {
            block: FlagBlock::new(),
        }
    }
}

impl FlagStorage for HeapFlags {
    #[inline]
    fn block(&self) -> &FlagBlock {
        &self.block
    }

    fn is_process_shared(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear() {
        let block = FlagBlock::new();
        assert!(!block.is_set(Flag::Stop));

        block.set(Flag::Stop);
        block.set(Flag::Pause);
        assert!(block.is_set(Flag::Stop));
        assert!(block.is_set(Flag::Pause));
        assert!(!block.is_set(Flag::SoftStop));

        block.clear(Flag::Pause);
        assert!(!block.is_set(Flag::Pause));
        assert!(block.is_set(Flag::Stop));
    }

    #[test]
    fn test_stopped_is_terminal() {
        let block = FlagBlock::new();
        assert_eq!(block.state(), WorkerState::Created);

        assert!(block.transition(WorkerState::Running));
        assert!(block.transition(WorkerState::Stopped));
        assert!(!block.transition(WorkerState::Running));
        assert!(!block.transition(WorkerState::Stopped));
        assert_eq!(block.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_conditional_transition() {
        let block = FlagBlock::new();
        assert!(!block.transition_from(&[WorkerState::Running], WorkerState::SoftStopPending));
        assert_eq!(block.state(), WorkerState::Created);

        block.transition(WorkerState::Running);
        assert!(block.transition_from(&[WorkerState::Running], WorkerState::SoftStopPending));
        assert_eq!(block.state(), WorkerState::SoftStopPending);
    }

    #[test]
    fn test_iteration_counter() {
        let flags = HeapFlags::new();
        assert_eq!(flags.block().iterations(), 0);
        assert_eq!(flags.block().bump_iterations(), 1);
        assert_eq!(flags.block().bump_iterations(), 2);
        assert_eq!(flags.block().iterations(), 2);
        assert!(!flags.is_process_shared());
    }
}
