//! Error types for the tracing shim.
//!
//! None of these ever reach the host process: interceptors log and drop
//! them, and always return the forwarded call's result.

use std::io;

/// The original implementation of a shadowed symbol could not be found.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("symbol `{symbol}` not found: {reason}")]
    NotFound {
        symbol: &'static str,
        reason: String,
    },
}

/// Writing a record to the side channel failed.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// Output has been turned off (`ntrace_set_output_fd(-1)`).
    #[error("side channel disabled")]
    Disabled,
    #[error("side channel write failed: {0}")]
    Io(#[from] io::Error),
}

/// A byte stream did not contain a well-formed frame record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("record does not start with `[NTRACE:`")]
    BadMagic,
    #[error("record header is not closed by `]`")]
    UnterminatedHeader,
    #[error("unknown direction `{0}`")]
    BadDirection(String),
    #[error("malformed {0} field in record header")]
    BadNumber(&'static str),
    #[error("payload not followed by `[/NTRACE]` terminator")]
    MissingTerminator,
}
