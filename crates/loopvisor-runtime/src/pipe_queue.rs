//! Cross-process queue over a pipe
//!
//! Each value is written as one frame (see `loopvisor_core::wire`). The pipe
//! is created before `fork`, so parent and child share both ends. The read
//! end is non-blocking: `get_nowait` returns straight away on an empty pipe,
//! and the blocking variants wait in `poll`.
//!
//! Frames up to `PIPE_BUF` bytes are written atomically. Larger frames are
//! only safe with a single writing process per queue.

use std::fmt;
use std::marker::PhantomData;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use loopvisor_core::channel::{Channel, ChannelFlavor, ErrorChannel};
use loopvisor_core::error::{ChannelError, ChannelResult};
use loopvisor_core::fault::ErrorReport;
use loopvisor_core::wire::{decode_payload, encode_frame, frame_len, WireCodec, FRAME_HEADER_SIZE};

struct Inner {
    read_fd: RawFd,
    write_fd: RawFd,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // SAFETY: both descriptors are owned by this queue.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Queue whose values are visible across `fork`
pub struct ProcessQueue<T> {
    inner: Arc<Inner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ProcessQueue<T> {
    pub fn new() -> ChannelResult<Self> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: fds has room for the two descriptors pipe() writes.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(ChannelError::Os(errno()));
        }
        let inner = Inner {
            read_fd: fds[0],
            write_fd: fds[1],
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        };
        set_cloexec(inner.read_fd)?;
        set_cloexec(inner.write_fd)?;
        set_nonblocking(inner.read_fd)?;

        Ok(Self {
            inner: Arc::new(inner),
            _marker: PhantomData,
        })
    }

    /// Wait until the read end has data, or the timeout passes.
    fn wait_readable(&self, timeout: Option<Duration>) -> ChannelResult<bool> {
        let timeout_ms = match timeout {
            None => -1,
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
        };
        let mut pfd = libc::pollfd {
            fd: self.inner.read_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: one valid pollfd.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc >= 0 {
                return Ok(rc > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0);
            }
            let e = errno();
            if e != libc::EINTR {
                return Err(ChannelError::Os(e));
            }
        }
    }

    /// Read exactly `buf.len()` bytes of a frame that has already started.
    fn read_rest(&self, buf: &mut [u8]) -> ChannelResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match read_some(self.inner.read_fd, &mut buf[filled..])? {
                Some(0) => return Err(ChannelError::Disconnected),
                Some(n) => filled += n,
                None => {
                    self.wait_readable(None)?;
                }
            }
        }
        Ok(())
    }
}

impl ProcessQueue<ErrorReport> {
    /// Shorthand for an error channel backed by a fresh `ProcessQueue`
    pub fn error_channel() -> ChannelResult<ErrorChannel> {
        Ok(Arc::new(Self::new()?))
    }
}

impl<T> Clone for ProcessQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ProcessQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessQueue")
            .field("read_fd", &self.inner.read_fd)
            .field("write_fd", &self.inner.write_fd)
            .finish()
    }
}

impl<T: WireCodec> Channel<T> for ProcessQueue<T> {
    fn flavor(&self) -> ChannelFlavor {
        ChannelFlavor::CrossProcess
    }

    fn put(&self, item: T) -> ChannelResult<()> {
        let frame = encode_frame(&item)?;
        let _guard = lock(&self.inner.write_lock);
        write_all(self.inner.write_fd, &frame)
    }

    fn get(&self) -> ChannelResult<T> {
        loop {
            match self.get_nowait() {
                Err(ChannelError::Empty) => {
                    self.wait_readable(None)?;
                }
                other => return other,
            }
        }
    }

    fn get_nowait(&self) -> ChannelResult<T> {
        let _guard = lock(&self.inner.read_lock);

        let mut header = [0u8; FRAME_HEADER_SIZE];
        match read_some(self.inner.read_fd, &mut header)? {
            None => return Err(ChannelError::Empty),
            Some(0) => return Err(ChannelError::Disconnected),
            Some(n) if n < FRAME_HEADER_SIZE => self.read_rest(&mut header[n..])?,
            Some(_) => {}
        }

        let mut payload = vec![0u8; frame_len(header)?];
        self.read_rest(&mut payload)?;
        Ok(decode_payload(&payload)?)
    }

    fn get_timeout(&self, timeout: Duration) -> ChannelResult<T> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.get_nowait() {
                Err(ChannelError::Empty) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() || !self.wait_readable(Some(left))? {
                        return Err(ChannelError::Timeout);
                    }
                }
                other => return other,
            }
        }
    }

    fn is_empty(&self) -> bool {
        !matches!(self.wait_readable(Some(Duration::ZERO)), Ok(true))
    }
}

fn lock(m: &Mutex<()>) -> MutexGuard<'_, ()> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// One non-blocking read. `None` when it would block.
fn read_some(fd: RawFd, buf: &mut [u8]) -> ChannelResult<Option<usize>> {
    loop {
        // SAFETY: buf is valid for buf.len() bytes.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(Some(n as usize));
        }
        match errno() {
            libc::EINTR => continue,
            e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => return Ok(None),
            e => return Err(ChannelError::Os(e)),
        }
    }
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> ChannelResult<()> {
    while !buf.is_empty() {
        // SAFETY: buf is valid for buf.len() bytes.
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            match errno() {
                libc::EINTR => continue,
                libc::EPIPE => return Err(ChannelError::Disconnected),
                e => return Err(ChannelError::Os(e)),
            }
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> ChannelResult<()> {
    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(ChannelError::Os(errno()));
        }
    }
    Ok(())
}

fn set_cloexec(fd: RawFd) -> ChannelResult<()> {
    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(ChannelError::Os(errno()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExecutionContext, ExecutionHandle, ProcessContext};
    use loopvisor_core::channel::{drain, is_queue_eventually_not_empty, safe_get};
    use loopvisor_core::fault::{FaultKind, FaultPhase, PanicFault, RemoteFault};

    #[test]
    fn test_put_get_in_process() {
        let q = ProcessQueue::<u64>::new().unwrap();
        assert!(q.is_empty());
        assert_eq!(q.get_nowait(), Err(ChannelError::Empty));

        q.put(7).unwrap();
        q.put(8).unwrap();
        assert!(!q.is_empty());
        assert_eq!(q.get().unwrap(), 7);
        assert_eq!(q.get_nowait().unwrap(), 8);
        assert!(q.is_empty());
        assert_eq!(q.flavor(), ChannelFlavor::CrossProcess);
    }

    #[test]
    fn test_get_timeout_on_empty() {
        let q = ProcessQueue::<String>::new().unwrap();
        let start = Instant::now();
        assert_eq!(q.get_timeout(Duration::from_millis(20)), Err(ChannelError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(safe_get(&q), None);
    }

    #[test]
    fn test_values_cross_fork() {
        let q = ProcessQueue::<String>::new().unwrap();
        let child_q = q.clone();
        let mut child = ProcessContext
            .spawn("lv-queue", move || {
                for word in ["alpha", "beta", "gamma"] {
                    let _ = child_q.put(word.to_string());
                }
            })
            .unwrap();
        assert_eq!(child.join().unwrap(), 0);

        assert!(is_queue_eventually_not_empty(&q));
        assert_eq!(drain(&q), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_error_report_crosses_fork() {
        let q = ProcessQueue::<ErrorReport>::new().unwrap();
        let child_q = q.clone();
        let mut child = ProcessContext
            .spawn("lv-fault", move || {
                let report = ErrorReport::capture(
                    FaultPhase::Iteration,
                    FaultKind::Panic,
                    Box::new(PanicFault::new("test message")),
                );
                let _ = child_q.put(report);
            })
            .unwrap();
        child.join().unwrap();

        let report = q.get_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(report.phase(), FaultPhase::Iteration);
        assert_eq!(report.message(), "test message");
        assert!(report.formatted_stack_trace().contains("iteration panic"));
        assert!(report.into_error().downcast::<RemoteFault>().is_ok());
    }
}
