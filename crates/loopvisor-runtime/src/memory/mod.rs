//! Flag storage that survives `fork`
//!
//! A process worker's [`FlagBlock`](loopvisor_core::FlagBlock) must be the
//! same physical memory in parent and child. Platform-specific
//! implementations map it on a shared anonymous page.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::SharedPageFlags;
    }
}
