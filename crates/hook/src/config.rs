//! Environment-driven settings, read lazily on first use.
//!
//! | variable           | meaning                                   | default  |
//! |--------------------|-------------------------------------------|----------|
//! | `NTRACE_FD`        | fd of the side channel; negative disables | `2`      |
//! | `NTRACE_LOG`       | diagnostics log path (`diagnostics`)      | unset    |
//! | `NTRACE_LOG_LEVEL` | `tracing` filter for that log             | `debug`  |

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;

use libc::c_int;

pub const FD_VAR: &str = "NTRACE_FD";
pub const LOG_VAR: &str = "NTRACE_LOG";
pub const LOG_LEVEL_VAR: &str = "NTRACE_LOG_LEVEL";

/// Standard error.
pub const DEFAULT_FD: c_int = libc::STDERR_FILENO;
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Set by [`ntrace_set_output_fd`]; `UNSET` defers to the environment.
static OUTPUT_FD_OVERRIDE: AtomicI32 = AtomicI32::new(UNSET);
static ENV_FD: OnceLock<c_int> = OnceLock::new();

const UNSET: c_int = c_int::MIN;

/// Parse an `NTRACE_FD` value.  Any negative number means "disabled".
pub fn parse_fd(raw: &str) -> Option<c_int> {
    raw.trim().parse::<c_int>().ok().map(|fd| fd.max(-1))
}

fn env_fd() -> c_int {
    *ENV_FD.get_or_init(|| match std::env::var(FD_VAR) {
        Ok(raw) => parse_fd(&raw).unwrap_or_else(|| {
            tracing::warn!(value = %raw, "ignoring malformed {}", FD_VAR);
            DEFAULT_FD
        }),
        Err(_) => DEFAULT_FD,
    })
}

/// The side-channel fd, or `None` when emission is disabled.
pub fn output_fd() -> Option<c_int> {
    let fd = match OUTPUT_FD_OVERRIDE.load(Ordering::Acquire) {
        UNSET => env_fd(),
        fd => fd,
    };
    if fd >= 0 {
        Some(fd)
    } else {
        None
    }
}

/// Redirect (or, with `-1`, silence) the side channel at runtime.
///
/// Meant for a consumer that opens its own pipe after the library has been
/// loaded.  Overrides `NTRACE_FD` from then on, whenever the environment
/// happens to be read.
#[no_mangle]
pub extern "C" fn ntrace_set_output_fd(fd: c_int) {
    OUTPUT_FD_OVERRIDE.store(fd.max(-1), Ordering::Release);
}

pub fn log_path() -> Option<PathBuf> {
    std::env::var_os(LOG_VAR)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

pub fn log_filter() -> String {
    std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
}
