//! Optional `tracing` output for debugging the shim itself.
//!
//! Never writes to the side channel: events go to the file named by
//! `NTRACE_LOG`, and nothing is installed when it is unset.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config;

pub fn init() {
    let Some(path) = config::log_path() else {
        return;
    };
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(_) => return,
    };
    let filter = EnvFilter::try_new(config::log_filter())
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_LEVEL));

    // A host that already installed a global subscriber keeps it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_ids(true)
        .try_init();
    tracing::debug!(pid = std::process::id(), log = %path.display(), "ntrace diagnostics enabled");
}
