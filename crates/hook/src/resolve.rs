//! Lookup of the real `send`/`recv` behind our shadows.
//!
//! This library is loaded ahead of libc, so `dlsym(RTLD_NEXT, ...)` skips our
//! own definitions and returns the next one in search order.  The results
//! live in a process-wide table that is filled exactly once; every later
//! call reads it without locking.

use std::ffi::{c_void, CStr};
use std::ptr::NonNull;
use std::sync::OnceLock;

use libc::{c_int, size_t, ssize_t, RTLD_NEXT};

use crate::emit::{self, Emitter, Sink};
use crate::error::ResolveError;
use crate::sys;

pub type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
pub type RecvFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;

/// Look up the next definition of `name` after this library.
pub fn resolve_next(name: &'static CStr) -> Result<NonNull<c_void>, ResolveError> {
    let symbol = name.to_str().unwrap_or("<non-utf8>");
    unsafe {
        // Clear any stale error so the message below belongs to this lookup.
        libc::dlerror();
        let sym = libc::dlsym(RTLD_NEXT, name.as_ptr());
        NonNull::new(sym).ok_or_else(|| {
            let msg = libc::dlerror();
            let reason = if msg.is_null() {
                "no definition after this library".to_string()
            } else {
                CStr::from_ptr(msg).to_string_lossy().into_owned()
            };
            ResolveError::NotFound { symbol, reason }
        })
    }
}

/// The original implementations.  A slot is `None` if its symbol could not
/// be resolved; forwarding through it fails with `ENOSYS`.
#[derive(Debug, Clone, Copy)]
pub struct OriginalCalls {
    pub send: Option<SendFn>,
    pub recv: Option<RecvFn>,
}

impl OriginalCalls {
    /// Resolve both slots, writing one INIT line per slot to `channel`.
    pub fn resolve<S: Sink>(channel: &Emitter<S>) -> Self {
        let send = load(channel, "send", c"send")
            .map(|p| unsafe { std::mem::transmute::<*mut c_void, SendFn>(p.as_ptr()) });
        let recv = load(channel, "recv", c"recv")
            .map(|p| unsafe { std::mem::transmute::<*mut c_void, RecvFn>(p.as_ptr()) });
        OriginalCalls { send, recv }
    }

    /// # Safety
    /// Same contract as `send(2)`.
    pub unsafe fn forward_send(
        &self,
        fd: c_int,
        buf: *const c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        match self.send {
            Some(real) => real(fd, buf, len, flags),
            None => {
                sys::set_errno(libc::ENOSYS);
                -1
            }
        }
    }

    /// # Safety
    /// Same contract as `recv(2)`.
    pub unsafe fn forward_recv(
        &self,
        fd: c_int,
        buf: *mut c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        match self.recv {
            Some(real) => real(fd, buf, len, flags),
            None => {
                sys::set_errno(libc::ENOSYS);
                -1
            }
        }
    }
}

fn load<S: Sink>(channel: &Emitter<S>, op: &str, name: &'static CStr) -> Option<NonNull<c_void>> {
    announce(channel, op, resolve_next(name))
}

/// Write the one-line INIT diagnostic for a lookup and pass the result on.
fn announce<S: Sink>(
    channel: &Emitter<S>,
    op: &str,
    result: Result<NonNull<c_void>, ResolveError>,
) -> Option<NonNull<c_void>> {
    let line = match &result {
        Ok(_) => format!("[NTRACE:INIT] Loaded {} hook", op),
        Err(err) => format!("[NTRACE:INIT] Failed to resolve {}: {}", op, err),
    };
    if let Err(err) = channel.notice(&line) {
        tracing::debug!(%err, "INIT diagnostic not written");
    }
    match result {
        Ok(addr) => {
            tracing::debug!(op, addr = ?addr, "resolved original");
            Some(addr)
        }
        Err(err) => {
            tracing::warn!(op, %err, "original unavailable, calls will fail with ENOSYS");
            None
        }
    }
}

static ORIGINALS: OnceLock<OriginalCalls> = OnceLock::new();

/// Fill `cell` on first use.  Concurrent first callers wait for the one
/// resolution, so the INIT lines are written once per cell.
fn table<'a, S: Sink>(cell: &'a OnceLock<OriginalCalls>, channel: &Emitter<S>) -> &'a OriginalCalls {
    cell.get_or_init(|| {
        #[cfg(feature = "diagnostics")]
        crate::diagnostics::init();
        OriginalCalls::resolve(channel)
    })
}

/// The process-wide table, resolved on first use.
pub fn originals() -> &'static OriginalCalls {
    table(&ORIGINALS, emit::channel())
}
