//! Scoped capture of handler console output.
//!
//! Handler scripts print through the engine's print hook, which forwards to
//! [`emit`]. Each thread has a slot holding the capture it is currently
//! writing to. [`OutputInterceptor::intercept`] opens a capture for one call
//! and installs it on the dispatcher thread; the call thread installs the same
//! capture with [`Capture::install`]. Both installations are undone by guards
//! when they drop, so the slot is restored on every exit path.
//!
//! A capture turns each non-blank write into a `StandardOutput` protocol line
//! immediately. Once its [`Interception`] ends, the capture is closed and later
//! writes (for example from a call that outlived its deadline) go to the
//! diagnostic log instead of the protocol stream.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::DispatchError;
use crate::protocol::{EventResponse, OutputEvent, ProtocolWriter};

/// Tracing target for captured output.
pub(crate) const INTERCEPTOR_TARGET: &str = "lifecycle_host::interceptor";

thread_local! {
    static ACTIVE_CAPTURE: RefCell<Option<Arc<Capture>>> = const { RefCell::new(None) };
}

/// Forwards one handler print to the capture active on this thread.
///
/// Text printed while no capture is installed is logged and dropped.
pub fn emit(text: &str) {
    let capture = ACTIVE_CAPTURE.with(|slot| slot.borrow().clone());
    match capture {
        Some(capture) => capture.write(text),
        None => debug!(
            target: INTERCEPTOR_TARGET,
            text = text.trim(),
            "handler output outside interception scope"
        ),
    }
}

/// Factory for per-call captures writing to the protocol stream.
#[derive(Debug, Clone)]
pub struct OutputInterceptor {
    output: ProtocolWriter,
}

impl OutputInterceptor {
    /// Creates an interceptor writing captured lines to `output`.
    #[must_use]
    pub const fn new(output: ProtocolWriter) -> Self {
        Self { output }
    }

    /// Opens a capture and installs it on the current thread.
    #[must_use = "output is only captured while the interception is alive"]
    pub fn intercept(&self) -> Interception {
        let capture = Arc::new(Capture {
            output: self.output.clone(),
            state: Mutex::new(CaptureState {
                open: true,
                failure: None,
            }),
        });
        let guard = capture.install();
        Interception {
            capture,
            _guard: guard,
        }
    }
}

/// One open interception scope.
///
/// Dropping it closes the capture and restores the current thread's previous
/// capture. Call [`Interception::finish`] to also learn whether writing any
/// captured line failed.
#[derive(Debug)]
pub struct Interception {
    capture: Arc<Capture>,
    _guard: InstallGuard,
}

impl Interception {
    /// Shared handle to the capture, for installation on a call thread.
    #[must_use]
    pub fn capture(&self) -> Arc<Capture> {
        Arc::clone(&self.capture)
    }

    /// Closes the scope.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while writing a captured line.
    pub fn finish(self) -> Result<(), DispatchError> {
        self.capture.close().map_or(Ok(()), Err)
    }
}

impl Drop for Interception {
    fn drop(&mut self) {
        drop(self.capture.close());
    }
}

/// Destination of captured output for one call.
#[derive(Debug)]
pub struct Capture {
    output: ProtocolWriter,
    state: Mutex<CaptureState>,
}

#[derive(Debug)]
struct CaptureState {
    open: bool,
    failure: Option<DispatchError>,
}

impl Capture {
    /// Makes this capture the current thread's output destination until the
    /// returned guard drops.
    #[must_use = "the capture is uninstalled when the guard drops"]
    pub fn install(self: &Arc<Self>) -> InstallGuard {
        let previous = ACTIVE_CAPTURE.with(|slot| slot.borrow_mut().replace(Arc::clone(self)));
        InstallGuard {
            previous,
            _thread_bound: PhantomData,
        }
    }

    /// Whether lines written now still reach the protocol stream.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn write(&self, text: &str) {
        let line = text.trim();
        if line.is_empty() {
            return;
        }

        // Writing under the state lock means `close` cannot slip between the
        // open check and the write.
        let mut state = self.lock();
        if !state.open {
            info!(
                target: INTERCEPTOR_TARGET,
                text = line,
                "handler output after its call was abandoned"
            );
            return;
        }
        if state.failure.is_some() {
            return;
        }
        let response = EventResponse::from(OutputEvent::new(line));
        if let Err(error) = self.output.write_response(&response) {
            state.failure = Some(error);
        }
    }

    fn close(&self) -> Option<DispatchError> {
        let mut state = self.lock();
        state.open = false;
        state.failure.take()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores a thread's previous capture when dropped.
#[derive(Debug)]
pub struct InstallGuard {
    previous: Option<Arc<Capture>>,
    _thread_bound: PhantomData<Rc<()>>,
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_CAPTURE.with(|slot| *slot.borrow_mut() = previous);
    }
}
