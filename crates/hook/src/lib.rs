//! LD_PRELOAD / DYLD_INSERT_LIBRARIES library that traces plaintext HTTP.
//!
//! Shadows libc's `send()` and `recv()`.  Buffers that start like an
//! HTTP/1.x request line or status line are copied to a side channel
//! (standard error unless `NTRACE_FD` says otherwise) as frame records:
//!
//! ```text
//! [NTRACE:SEND:5:19]GET /x HTTP/1.1\r\n\r\n[/NTRACE]\n
//! ```
//!
//! The host process sees no difference: arguments are forwarded unchanged
//! and the original return value and `errno` come back verbatim.  Encrypted
//! traffic is not visible, and only single-buffer prefixes are recognised.
//!
//! Outbound records carry the length the caller *asked* to send, not what
//! the kernel accepted, so a short send is over-reported.
//!
//! The `rlib` build also exposes the classifier and the record codec
//! ([`frame::decode`], [`frame::FrameReader`]) for consumers of the stream.
//! Such consumers should depend on it with `default-features = false`: the
//! default `preload` feature exports `send`/`recv` and would trace the
//! consumer's own sockets.

pub mod classify;
pub mod config;
#[cfg(feature = "diagnostics")]
pub mod diagnostics;
pub mod emit;
pub mod error;
pub mod frame;
mod hooks;
pub mod intercept;
pub mod resolve;
pub mod sys;

pub use classify::is_http;
pub use emit::{Emitter, Sink};
pub use error::{EmitError, FrameError, ResolveError};
pub use frame::{CaptureEvent, Direction, Frame, FrameReader};
