//! Exported entry points.
//!
//! **Linux:** the dynamic linker resolves symbols in `LD_PRELOAD` libraries
//! first, so defining `send()`/`recv()` directly shadows libc's.
//!
//! **macOS:** two-level namespaces prevent plain shadowing.  We define
//! `ntrace_send()`/`ntrace_recv()` and register them in a
//! `__DATA,__interpose` table so dyld redirects libSystem's `send`/`recv`
//! to them under `DYLD_INSERT_LIBRARIES`.  Because this image has no symbol
//! named `send`, `dlsym(RTLD_NEXT, "send")` still finds libSystem's.
//!
//! Both sets only exist with the `preload` feature, and never in unit-test
//! builds, where they would shadow the test binary's own sockets.

// ---------------------------------------------------------------------------
// Library readiness flag (macOS)
// ---------------------------------------------------------------------------
//
// Interposed calls can arrive during libSystem_initializer, before TLS and
// the allocator are usable.  Until our constructor has run, the entry points
// call straight through to libSystem without touching any of our state.

#[cfg(target_os = "macos")]
#[cfg_attr(any(test, not(feature = "preload")), allow(dead_code))]
static READY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Registered via `__DATA,__mod_init_func`; dyld calls it after libSystem is
/// initialized but before `main()`.
#[cfg(target_os = "macos")]
#[used]
#[link_section = "__DATA,__mod_init_func"]
static INIT_FN: unsafe extern "C" fn() = {
    unsafe extern "C" fn ntrace_init() {
        READY.store(true, std::sync::atomic::Ordering::Release);
    }
    ntrace_init
};

// ===========================================================================
// Linux (LD_PRELOAD)
// ===========================================================================

#[cfg(all(feature = "preload", not(test), not(target_os = "macos")))]
mod linux_intercept {
    use libc::{c_int, c_void, size_t, ssize_t};

    use crate::{emit, intercept, resolve};

    /// Intercept `send()`.
    #[no_mangle]
    pub unsafe extern "C" fn send(
        fd: c_int,
        buf: *const c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        let originals = resolve::originals();
        intercept::traced_send(emit::channel(), fd, buf as *const u8, len, || unsafe {
            originals.forward_send(fd, buf, len, flags)
        })
    }

    /// Intercept `recv()`.
    #[no_mangle]
    pub unsafe extern "C" fn recv(
        fd: c_int,
        buf: *mut c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        let originals = resolve::originals();
        intercept::traced_recv(emit::channel(), fd, buf as *const u8, len, || unsafe {
            originals.forward_recv(fd, buf, len, flags)
        })
    }
}

// ===========================================================================
// macOS (DYLD_INSERT_LIBRARIES + __interpose)
// ===========================================================================

#[cfg(all(feature = "preload", not(test), target_os = "macos"))]
mod macos_intercept {
    use std::sync::atomic::Ordering;

    use libc::{c_int, c_void, size_t, ssize_t};

    use super::READY;
    use crate::{emit, intercept, resolve};

    // dyld does not interpose calls made from the interposing image itself,
    // so `libc::send`/`libc::recv` here reach libSystem directly.

    /// Intercept `send()`.
    #[no_mangle]
    pub unsafe extern "C" fn ntrace_send(
        fd: c_int,
        buf: *const c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        if !READY.load(Ordering::Acquire) {
            return libc::send(fd, buf, len, flags);
        }
        let originals = resolve::originals();
        intercept::traced_send(emit::channel(), fd, buf as *const u8, len, || unsafe {
            originals.forward_send(fd, buf, len, flags)
        })
    }

    /// Intercept `recv()`.
    #[no_mangle]
    pub unsafe extern "C" fn ntrace_recv(
        fd: c_int,
        buf: *mut c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        if !READY.load(Ordering::Acquire) {
            return libc::recv(fd, buf, len, flags);
        }
        let originals = resolve::originals();
        intercept::traced_recv(emit::channel(), fd, buf as *const u8, len, || unsafe {
            originals.forward_recv(fd, buf, len, flags)
        })
    }
}

// The `__DATA,__interpose` section tells dyld to replace calls to the
// "original" function (from libSystem) with the "replacement" function.

#[cfg(all(feature = "preload", not(test), target_os = "macos"))]
mod interpose {
    use super::macos_intercept::*;

    #[repr(C)]
    struct InterposeEntry {
        replacement: *const (),
        original: *const (),
    }

    // SAFETY: These are immutable function pointers resolved at load time.
    unsafe impl Sync for InterposeEntry {}

    #[link_section = "__DATA,__interpose"]
    #[used]
    static INTERPOSE_TABLE: [InterposeEntry; 2] = [
        InterposeEntry {
            replacement: ntrace_send as *const (),
            original: libc::send as *const (),
        },
        InterposeEntry {
            replacement: ntrace_recv as *const (),
            original: libc::recv as *const (),
        },
    ];
}

#[cfg(test)]
mod tests {
    use crate::resolve::resolve_next;

    /// The test binary links this crate, so symbol lookup from it must still
    /// land on libc's `send`/`recv` rather than a definition of ours.
    #[test]
    fn test_build_does_not_shadow_libc() {
        for name in [c"send", c"recv"] {
            let global = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
            assert_eq!(global, resolve_next(name).unwrap().as_ptr());
        }
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn constructor_marks_library_ready() {
        assert!(super::READY.load(std::sync::atomic::Ordering::Acquire));
    }
}
