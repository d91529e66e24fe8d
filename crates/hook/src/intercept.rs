//! What the shadowed `send`/`recv` do, independent of how they are exported.
//!
//! Outbound buffers are classified and recorded *before* forwarding, using
//! the length the caller asked to send.  A short send therefore reports more
//! bytes than the kernel accepted; consumers rely on the requested length,
//! so this is kept.  Inbound buffers are forwarded first and recorded from
//! the bytes actually received.
//!
//! In both cases the forwarded result is returned untouched, and `errno` is
//! restored after any tracing work.

use libc::{c_int, ssize_t};

use crate::classify;
use crate::emit::{Emitter, Sink};
use crate::frame::{CaptureEvent, Direction};
use crate::sys::{ErrnoGuard, ReentrancyGuard};

/// Record `payload` if it looks like HTTP.  Never fails.
fn trace<S: Sink>(channel: &Emitter<S>, direction: Direction, fd: c_int, payload: &[u8]) {
    if !classify::is_http(payload) {
        return;
    }
    if S::writes_to(fd) {
        return;
    }
    let _guard = match ReentrancyGuard::enter() {
        Some(g) => g,
        None => return,
    };
    let _errno = ErrnoGuard::save();

    let event = CaptureEvent::new(direction, fd, payload);
    if let Err(err) = channel.emit(&event) {
        tracing::debug!(
            fd,
            len = payload.len(),
            direction = direction.token(),
            %err,
            "capture record dropped"
        );
    }
}

/// Outbound path: classify, maybe record, then forward.
///
/// # Safety
/// `buf` must be null or valid for reads of `len` bytes.
pub unsafe fn traced_send<S, F>(
    channel: &Emitter<S>,
    fd: c_int,
    buf: *const u8,
    len: usize,
    forward: F,
) -> ssize_t
where
    S: Sink,
    F: FnOnce() -> ssize_t,
{
    if !buf.is_null() && len > 0 {
        let payload = std::slice::from_raw_parts(buf, len);
        trace(channel, Direction::Send, fd, payload);
    }
    forward()
}

/// Inbound path: forward, then record what arrived.
///
/// `recv` may report more than `len` bytes (`MSG_TRUNC` on a datagram
/// socket returns the full datagram size), so the record is cut at the
/// caller's buffer.
///
/// # Safety
/// `buf` must be null or valid for reads of `len` bytes once `forward`
/// returns.
pub unsafe fn traced_recv<S, F>(
    channel: &Emitter<S>,
    fd: c_int,
    buf: *const u8,
    len: usize,
    forward: F,
) -> ssize_t
where
    S: Sink,
    F: FnOnce() -> ssize_t,
{
    let result = forward();
    if result > 0 && !buf.is_null() {
        let received = (result as usize).min(len);
        let payload = std::slice::from_raw_parts(buf, received);
        trace(channel, Direction::Recv, fd, payload);
    }
    result
}
