//! Shutdown signal plumbing for the benchmark binaries.
//!
//! The binaries block SIGINT/SIGTERM in the main thread before any worker
//! thread is spawned (spawned threads inherit the mask), then park in
//! `sigwait` until the operator asks for shutdown. This gives a clean
//! exit-0 path on Ctrl-C instead of default termination.

use std::io;
use std::mem;

/// Blocks SIGINT and SIGTERM for the calling thread.
///
/// Call this in `main` before creating any threads so the whole process
/// inherits the mask and the signals are only ever consumed by
/// [`wait_for_shutdown`].
///
/// # Errors
///
/// Returns the OS error if the mask cannot be installed.
pub fn block_shutdown_signals() -> io::Result<()> {
    // SAFETY: sigset manipulation on a local set, then a mask update for
    // the calling thread only.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

/// Blocks until SIGINT or SIGTERM arrives; returns the signal number.
///
/// Requires [`block_shutdown_signals`] to have been called first.
///
/// # Errors
///
/// Returns the OS error if the wait fails.
pub fn wait_for_shutdown() -> io::Result<i32> {
    // SAFETY: waits on a locally constructed set; sig is written by sigwait.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        let mut sig: libc::c_int = 0;
        let rc = libc::sigwait(&set, &mut sig);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(sig)
    }
}
