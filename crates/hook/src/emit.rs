//! Serialized writer for the side channel.
//!
//! Every record is written while holding one lock, so records from
//! concurrent threads never interleave at the byte level.  This is the only
//! lock the library takes on the interception path, and only for buffers
//! the classifier accepted.
//!
//! A child forked while another thread held the lock would inherit it
//! locked with no owner.  The process-wide channel registers a
//! `pthread_atfork` child handler that releases it.

use std::io::{self, IoSlice, Write};
use std::sync::Once;

use libc::c_int;
use parking_lot::Mutex;

use crate::config;
use crate::error::EmitError;
use crate::frame::{self, CaptureEvent};
use crate::sys::RawFd;

/// Destination of records.
pub trait Sink: Write {
    /// Called under the lock before each record.  Returning `false` drops
    /// the record without touching the writer.
    fn prepare(&mut self) -> bool {
        true
    }

    /// `true` if records end up on `fd`, which makes traffic on it our own.
    fn writes_to(_fd: c_int) -> bool {
        false
    }
}

impl Sink for Vec<u8> {}
impl Sink for std::fs::File {}

/// The process-wide side channel.
///
/// The fd named by [`config::output_fd`] is picked once per record in
/// [`Sink::prepare`], so a concurrent `ntrace_set_output_fd` never splits a
/// record across two descriptors.
pub struct FdSink {
    fd: c_int,
}

impl FdSink {
    pub const fn new() -> Self {
        FdSink { fd: -1 }
    }
}

impl Default for FdSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for FdSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RawFd(self.fd).write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        RawFd(self.fd).write_vectored(bufs)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for FdSink {
    fn prepare(&mut self) -> bool {
        match config::output_fd() {
            Some(fd) => {
                self.fd = fd;
                true
            }
            None => false,
        }
    }

    fn writes_to(fd: c_int) -> bool {
        config::output_fd() == Some(fd)
    }
}

pub struct Emitter<S> {
    sink: Mutex<S>,
}

impl<S: Sink> Emitter<S> {
    pub const fn new(sink: S) -> Self {
        Emitter {
            sink: parking_lot::const_mutex(sink),
        }
    }

    /// Write one complete frame record for `event`.
    pub fn emit(&self, event: &CaptureEvent<'_>) -> Result<(), EmitError> {
        let mut sink = self.sink.lock();
        if !sink.prepare() {
            return Err(EmitError::Disabled);
        }
        frame::write_frame(&mut *sink, event)?;
        Ok(())
    }

    /// Write a diagnostic line (newline appended).
    pub fn notice(&self, line: &str) -> Result<(), EmitError> {
        let mut sink = self.sink.lock();
        if !sink.prepare() {
            return Err(EmitError::Disabled);
        }
        let mut slices = [IoSlice::new(line.as_bytes()), IoSlice::new(b"\n")];
        frame::write_all_vectored(&mut *sink, &mut slices)?;
        sink.flush()?;
        Ok(())
    }

    /// Release a lock inherited from the parent across `fork`.
    ///
    /// # Safety
    ///
    /// Only sound in a freshly forked child, where the thread that held the
    /// lock does not exist.  Any record it was writing is left unfinished.
    pub unsafe fn reset_after_fork(&self) {
        if self.sink.is_locked() {
            self.sink.force_unlock();
        }
    }

    /// Consume the emitter and hand back its sink.
    pub fn into_inner(self) -> S {
        self.sink.into_inner()
    }
}

static CHANNEL: Emitter<FdSink> = Emitter::new(FdSink::new());
static ATFORK: Once = Once::new();

unsafe extern "C" fn release_channel_in_child() {
    CHANNEL.reset_after_fork()
}

pub fn channel() -> &'static Emitter<FdSink> {
    ATFORK.call_once(|| {
        let rc = unsafe { libc::pthread_atfork(None, None, Some(release_channel_in_child)) };
        if rc != 0 {
            tracing::warn!(rc, "pthread_atfork failed; forked children may block on the side channel");
        }
    });
    &CHANNEL
}
