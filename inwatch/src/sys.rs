//! The kernel side of inotify.
//!
//! [`InotifyHandle`] is everything [`EventSource`](crate::EventSource) needs
//! from the operating system: adding and removing watches, readiness, and
//! reads. [`Inotify`] implements it on top of the real syscalls with Tokio's
//! [`AsyncFd`] providing readiness notification.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};

use tokio::io::unix::AsyncFd;
use tokio::runtime::Handle;

use crate::mask::{InitFlags, Mask};
use crate::watch::WatchDescriptor;

/// Operations on an inotify instance.
///
/// Reads never block: they return [`io::ErrorKind::WouldBlock`] when no data
/// is queued. Only one read registration is outstanding at a time because
/// every read method borrows the owning source mutably.
pub trait InotifyHandle: Send + 'static {
    /// Add or update a watch on `path`.
    fn add_watch(&self, path: &Path, mask: Mask) -> io::Result<WatchDescriptor>;

    /// Ask the kernel to remove a watch. The kernel answers with IGNORED.
    fn rm_watch(&self, wd: WatchDescriptor) -> io::Result<()>;

    /// Wait for readiness through `cx`, then perform exactly one read.
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>>;

    /// Block the calling thread until the handle is readable or `timeout`
    /// passes. Returns `false` on timeout.
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Single non-blocking read.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the handle.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// A live inotify instance.
///
/// The descriptor joins the Tokio reactor on the first async read, so an
/// instance can be created and used through the blocking methods without a
/// runtime.
#[derive(Debug)]
pub struct Inotify {
    // Declared before `fd` so the reactor registration is dropped first.
    reactor: OnceLock<AsyncFd<RawFd>>,
    reactor_init: Mutex<()>,
    fd: OwnedFd,
}

impl Inotify {
    /// Create a new inotify instance.
    ///
    /// The descriptor is always non-blocking: readiness is awaited before
    /// every read, and a blocking read would stall the runtime thread.
    pub fn init(flags: InitFlags) -> io::Result<Self> {
        // SAFETY: inotify_init1 has no memory-safety preconditions.
        let fd = unsafe { libc::inotify_init1((flags | InitFlags::NONBLOCK).bits()) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by the kernel and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            reactor: OnceLock::new(),
            reactor_init: Mutex::new(()),
            fd,
        })
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Reactor registration, created on first use.
    fn reactor(&self) -> io::Result<&AsyncFd<RawFd>> {
        if let Some(reactor) = self.reactor.get() {
            return Ok(reactor);
        }
        let _guard = self.reactor_init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reactor) = self.reactor.get() {
            return Ok(reactor);
        }
        if Handle::try_current().is_err() {
            return Err(io::Error::other(
                "async inotify reads need a Tokio runtime; use blocking_get outside one",
            ));
        }
        let reactor = AsyncFd::new(self.raw())?;
        Ok(self.reactor.get_or_init(|| reactor))
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
    let res = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(res as usize)
    }
}

impl InotifyHandle for Inotify {
    fn add_watch(&self, path: &Path, mask: Mask) -> io::Result<WatchDescriptor> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let wd = unsafe { libc::inotify_add_watch(self.raw(), c_path.as_ptr(), mask.bits()) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WatchDescriptor::from_raw(wd))
    }

    fn rm_watch(&self, wd: WatchDescriptor) -> io::Result<()> {
        // SAFETY: plain syscall on a descriptor we own.
        let res = unsafe { libc::inotify_rm_watch(self.raw(), wd.as_raw()) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.reactor()?.poll_read_ready(cx))?;
            match guard.try_io(|inner| read_fd(*inner.get_ref(), buf)) {
                Ok(result) => return Poll::Ready(result),
                // Readiness was stale and has been cleared; register again.
                Err(_would_block) => continue,
            }
        }
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let timeout_ms = match deadline {
                None => -1,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    // Round up so a sub-millisecond remainder still waits.
                    left.as_nanos().div_ceil(1_000_000).min(libc::c_int::MAX as u128) as libc::c_int
                }
            };

            let mut pollfd = libc::pollfd {
                fd: self.raw(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `pollfd` is a valid array of one element.
            let res = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            match res {
                n if n > 0 => return Ok(true),
                0 => return Ok(false),
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        read_fd(self.raw(), buf)
    }

    fn close(self) -> io::Result<()> {
        let Self { reactor, fd, .. } = self;
        drop(reactor);
        let fd = fd.into_raw_fd();
        // SAFETY: ownership of `fd` was released above, so it is closed exactly once.
        if unsafe { libc::close(fd) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
