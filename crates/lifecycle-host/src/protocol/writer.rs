//! Shared, line-atomic writer for the protocol output stream.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use super::EventResponse;
use super::encoding::to_compat_string;
use crate::error::DispatchError;

/// Cloneable handle to the real output sink.
///
/// The dispatcher writes terminal responses through it while captured handler
/// output is written from call threads. Each response is encoded before the
/// lock is taken, then written, newline-terminated and flushed under a single
/// lock acquisition so lines never interleave.
#[derive(Clone)]
pub struct ProtocolWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ProtocolWriter {
    /// Wraps the given sink.
    #[must_use]
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Writes one response line and flushes the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, writing or flushing fails.
    pub fn write_response(&self, response: &EventResponse) -> Result<(), DispatchError> {
        let line = to_compat_string(response)?;
        // A panic while holding the lock cannot leave a torn line behind, so a
        // poisoned sink is still usable.
        let mut writer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for ProtocolWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolWriter").finish_non_exhaustive()
    }
}
