//! Termination request handling.
//!
//! SIGINT and SIGTERM are caught with handlers installed without
//! `SA_RESTART`, so a blocking `recv_from` on the signalled thread returns
//! `EINTR` instead of resuming. The handler sets a flag and writes one byte
//! into a self-pipe; [`ShutdownSignal::wait_timeout`] blocks in `poll(2)` on
//! that pipe, so timer waits end as soon as a request arrives.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Set by the signal handler or [`request_shutdown`].
static SIGNALLED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
mod os {
    use super::SIGNALLED;
    use std::io;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::OnceLock;
    use std::time::Duration;

    static WAKE_READ: AtomicI32 = AtomicI32::new(-1);
    static WAKE_WRITE: AtomicI32 = AtomicI32::new(-1);
    static INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();

    extern "C" fn handle_signal(_signum: libc::c_int) {
        SIGNALLED.store(true, Ordering::SeqCst);
        wake();
    }

    /// Async-signal-safe: one non-blocking write.
    pub(super) fn wake() {
        let fd = WAKE_WRITE.load(Ordering::SeqCst);
        if fd >= 0 {
            let byte = 1u8;
            unsafe {
                libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
            }
        }
    }

    fn set_flags(fd: libc::c_int) -> Result<(), i32> {
        unsafe {
            let fl = libc::fcntl(fd, libc::F_GETFL);
            if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
                return Err(last_errno());
            }
            let fdfl = libc::fcntl(fd, libc::F_GETFD);
            if fdfl < 0 || libc::fcntl(fd, libc::F_SETFD, fdfl | libc::FD_CLOEXEC) < 0 {
                return Err(last_errno());
            }
        }
        Ok(())
    }

    fn last_errno() -> i32 {
        io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
    }

    fn install_once() -> Result<(), i32> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(last_errno());
        }
        set_flags(fds[0])?;
        set_flags(fds[1])?;
        WAKE_READ.store(fds[0], Ordering::SeqCst);
        WAKE_WRITE.store(fds[1], Ordering::SeqCst);

        for signum in [libc::SIGINT, libc::SIGTERM] {
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as usize;
                // No SA_RESTART: blocking calls return EINTR.
                action.sa_flags = 0;
                libc::sigemptyset(&mut action.sa_mask);
                if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                    return Err(last_errno());
                }
            }
        }
        Ok(())
    }

    pub(super) fn install() -> io::Result<()> {
        (*INSTALLED.get_or_init(install_once)).map_err(io::Error::from_raw_os_error)
    }

    /// Block until the wake pipe is readable, a signal interrupts, or the timeout passes.
    pub(super) fn wait_readable(timeout: Duration) {
        let fd = WAKE_READ.load(Ordering::SeqCst);
        if fd < 0 {
            std::thread::sleep(timeout);
            return;
        }
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let ready = unsafe { libc::poll(&mut pfd, 1, ms) };
        if ready > 0 {
            drain(fd);
        }
    }

    fn drain(fd: libc::c_int) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

struct Inner {
    requested: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

/// A cloneable shutdown request flag with an interruptible wait.
///
/// Handles created with [`ShutdownSignal::install`] also observe SIGINT and
/// SIGTERM; handles created with [`ShutdownSignal::new`] only observe
/// [`ShutdownSignal::request`].
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
    os_linked: bool,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_requested())
            .field("os_linked", &self.os_linked)
            .finish()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// A handle driven only by [`ShutdownSignal::request`].
    pub fn new() -> Self {
        ShutdownSignal {
            inner: Arc::new(Inner {
                requested: AtomicBool::new(false),
                lock: Mutex::new(()),
                cvar: Condvar::new(),
            }),
            os_linked: false,
        }
    }

    /// Install the SIGINT/SIGTERM handlers and return a handle linked to them.
    ///
    /// Installing more than once is harmless. On non-Unix targets the handle
    /// is not linked to OS signals.
    pub fn install() -> io::Result<Self> {
        #[cfg(unix)]
        os::install()?;
        Ok(ShutdownSignal {
            os_linked: cfg!(unix),
            ..Self::new()
        })
    }

    /// Request shutdown and wake every waiter.
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        {
            let _guard = self.inner.lock.lock().unwrap_or_else(|e| e.into_inner());
            self.inner.cvar.notify_all();
        }
        if self.os_linked {
            request_shutdown();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
            || (self.os_linked && SIGNALLED.load(Ordering::SeqCst))
    }

    /// Wait up to `timeout`. Returns true when shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_requested() {
            return true;
        }

        #[cfg(unix)]
        {
            if self.os_linked {
                let deadline = Instant::now() + timeout;
                loop {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.is_requested();
                    }
                    os::wait_readable(deadline - now);
                    if self.is_requested() {
                        return true;
                    }
                }
            }
        }

        let guard = self.inner.lock.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self
            .inner
            .cvar
            .wait_timeout_while(guard, timeout, |_| !self.is_requested());
        self.is_requested()
    }
}

/// Request shutdown of the whole process, as if SIGTERM had arrived.
pub fn request_shutdown() {
    SIGNALLED.store(true, Ordering::SeqCst);
    #[cfg(unix)]
    os::wake();
}
