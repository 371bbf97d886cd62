//! Unix shared flag page using mmap

use std::ptr::{self, NonNull};

use loopvisor_core::error::{WorkerError, WorkerResult};
use loopvisor_core::flags::{FlagBlock, FlagStorage};

/// A [`FlagBlock`] on a `MAP_SHARED | MAP_ANONYMOUS` page.
///
/// The mapping is inherited by children forked after it was created, and
/// both sides see each other's writes. Each process unmaps its own view on
/// drop.
pub struct SharedPageFlags {
    block: NonNull<FlagBlock>,
    len: usize,
}

// SAFETY: the page only holds a FlagBlock, which is made of atomics. The
// pointer stays valid until Drop unmaps it.
unsafe impl Send for SharedPageFlags {}
unsafe impl Sync for SharedPageFlags {}

impl SharedPageFlags {
    pub fn new() -> WorkerResult<Self> {
        let len = page_rounded(std::mem::size_of::<FlagBlock>());

        // SAFETY: anonymous mapping, no file descriptor involved.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(WorkerError::SharedMemory(last_errno()));
        }

        let block = addr as *mut FlagBlock;
        // SAFETY: fresh page-aligned mapping of at least size_of::<FlagBlock>()
        // bytes; page alignment satisfies FlagBlock's 64-byte alignment.
        unsafe { ptr::write(block, FlagBlock::new()) };

        match NonNull::new(block) {
            Some(block) => Ok(Self { block, len }),
            None => Err(WorkerError::SharedMemory(libc::EFAULT)),
        }
    }

    /// Size of the mapping in bytes
    pub fn mapped_len(&self) -> usize {
        self.len
    }
}

impl FlagStorage for SharedPageFlags {
    #[inline]
    fn block(&self) -> &FlagBlock {
        // SAFETY: initialized in new(), unmapped only in drop().
        unsafe { self.block.as_ref() }
    }

    fn is_process_shared(&self) -> bool {
        true
    }
}

impl Drop for SharedPageFlags {
    fn drop(&mut self) {
        // SAFETY: mapping created in new() with this length.
        unsafe {
            libc::munmap(self.block.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

impl std::fmt::Debug for SharedPageFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPageFlags")
            .field("len", &self.len)
            .field("block", self.block())
            .finish()
    }
}

fn page_rounded(size: usize) -> usize {
    // SAFETY: sysconf has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page = if page > 0 { page as usize } else { 4096 };
    (size + page - 1) / page * page
}

pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
