//! Thin libc helpers: errno save/restore, the per-thread reentrancy guard,
//! and a `Write` adapter over a raw file descriptor.

use std::cell::Cell;
use std::io::{self, IoSlice, Write};

use libc::{c_int, c_void};

// ---------------------------------------------------------------------------
// Portable errno helpers
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
pub(crate) fn errno() -> c_int {
    unsafe { *libc::__errno_location() }
}

#[cfg(target_os = "macos")]
pub(crate) fn errno() -> c_int {
    unsafe { *libc::__error() }
}

#[cfg(target_os = "linux")]
pub(crate) fn set_errno(val: c_int) {
    unsafe { *libc::__errno_location() = val }
}

#[cfg(target_os = "macos")]
pub(crate) fn set_errno(val: c_int) {
    unsafe { *libc::__error() = val }
}

/// Restores the thread's `errno` on drop, so work done between a forwarded
/// call and the return to the host is invisible to it.
pub(crate) struct ErrnoGuard(c_int);

impl ErrnoGuard {
    pub(crate) fn save() -> Self {
        ErrnoGuard(errno())
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        set_errno(self.0);
    }
}

// ---------------------------------------------------------------------------
// Per-thread reentrancy guard
// ---------------------------------------------------------------------------
//
// An interceptor entered again on the same thread while it is emitting (for
// example from a diagnostics writer that ends up on a socket) would block
// forever on the emitter lock.  The inner call forwards without tracing.

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

pub(crate) struct ReentrancyGuard;

impl ReentrancyGuard {
    pub(crate) fn enter() -> Option<Self> {
        IN_HOOK.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(ReentrancyGuard)
            }
        })
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|flag| flag.set(false));
    }
}

// ---------------------------------------------------------------------------
// Raw fd writer
// ---------------------------------------------------------------------------

/// Unbuffered writer over an fd it does not own.  Uses libc's `write` and
/// `writev` directly; neither is interposed by this library.
pub struct RawFd(pub c_int);

impl Write for RawFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.0, buf.as_ptr() as *const c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        // IoSlice is ABI-compatible with iovec on Unix.
        let cnt = bufs.len().min(c_int::MAX as usize) as c_int;
        let n = unsafe { libc::writev(self.0, bufs.as_ptr() as *const libc::iovec, cnt) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
