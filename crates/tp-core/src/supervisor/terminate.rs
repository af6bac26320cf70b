//! Graceful and forced termination of child processes.

use std::io;
use std::process::Child;
use tracing::debug;

/// Ask the child to exit (SIGTERM).
#[cfg(unix)]
pub fn request_stop(child: &mut Child) -> io::Result<()> {
    send_signal(child, libc::SIGTERM)
}

/// Terminate the child immediately (SIGKILL).
#[cfg(unix)]
pub fn force_kill(child: &mut Child) -> io::Result<()> {
    send_signal(child, libc::SIGKILL)
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: libc::c_int) -> io::Result<()> {
    // Already reaped: the pid may have been reused.
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    let pid = child.id() as libc::pid_t;
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    debug!(pid, signal, "sent signal");
    Ok(())
}

#[cfg(not(unix))]
pub fn request_stop(child: &mut Child) -> io::Result<()> {
    child.kill()
}

#[cfg(not(unix))]
pub fn force_kill(child: &mut Child) -> io::Result<()> {
    child.kill()
}
