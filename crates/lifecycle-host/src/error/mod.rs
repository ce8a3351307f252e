//! Error types raised by the host.
//!
//! Errors are split by blast radius. [`DispatchError`] halts the dispatch loop
//! and terminates the process. [`LifecycleError`] is resolved at the dispatch
//! boundary: it is rendered to the diagnostic stream and turned into the fixed
//! error response for the offending event, after which the loop moves on.
//! [`LoadError`] describes why a handler script could not be loaded and is
//! reported through [`LifecycleError::Load`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::executor::CallFailure;
use crate::protocol::Lifecycle;
use crate::traceback::Traceback;

/// Fatal errors that stop the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An input line could not be decoded as a protocol request.
    #[error("Invalid input format: {line}")]
    Protocol {
        /// The offending line, verbatim.
        line: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A response could not be encoded.
    #[error("failed to serialize response: {0}")]
    SerializeResponse(#[from] serde_json::Error),
}

/// Errors raised while resolving and loading a handler script.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The handler path does not name a regular file.
    #[error("File {} does not exist", path.display())]
    NotFound {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The handler file exists but could not be read.
    #[error("failed to read handler '{}': {source}", path.display())]
    Read {
        /// Handler path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The handler script failed to compile.
    #[error("failed to compile handler '{}': {message}", path.display())]
    Compile {
        /// Handler path.
        path: PathBuf,
        /// Compiler diagnostic.
        message: String,
    },

    /// The handler's top-level initialisation raised an error.
    #[error("handler '{}' failed during initialisation: {message}", path.display())]
    Initialise {
        /// Handler path.
        path: PathBuf,
        /// Root cause of the failure.
        message: String,
        /// Frames attributable to the handler script.
        traceback: Traceback,
    },
}

impl LoadError {
    /// Whether a later event may attempt the load again.
    ///
    /// Only failures that happen before any handler code runs qualify. Once
    /// compilation or initialisation has been attempted the outcome is final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Read { .. })
    }
}

/// Per-event failures, isolated to the event that raised them.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The request named an event outside the lifecycle contract.
    #[error("Unknown event type: {event}")]
    UnknownEvent {
        /// Event name as received.
        event: String,
    },

    /// The handler could not be loaded.
    ///
    /// Final load failures are shared by every later event.
    #[error("Error: {0}")]
    Load(#[source] Arc<LoadError>),

    /// The handler does not define the requested entry point.
    #[error("Error: handler does not implement {}", .lifecycle.function_name())]
    MissingCapability {
        /// Requested entry point.
        lifecycle: Lifecycle,
    },

    /// The handler raised an error during the call.
    #[error("Error: {}\nProcessor traceback:\n{}", .0.message(), .0.traceback())]
    Execution(CallFailure),

    /// The call did not finish before the deadline.
    #[error("Error: Function timed out after {timeout:?}")]
    Timeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The handler returned something other than a map.
    #[error("Invalid result format. Expecting a dictionary, got {type_name}: {rendered}")]
    ResultShape {
        /// JSON type of the returned value.
        type_name: &'static str,
        /// The returned value, encoded as JSON.
        rendered: String,
    },
}

impl LifecycleError {
    /// Full diagnostic text written to the diagnostic stream.
    ///
    /// This is the display form plus, for initialisation failures, the
    /// filtered traceback of the handler's top-level code.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Load(error) => match error.as_ref() {
                LoadError::Initialise { traceback, .. } => {
                    format!("{self}\nProcessor traceback:\n{traceback}")
                }
                _ => self.to_string(),
            },
            _ => self.to_string(),
        }
    }

    /// Short machine-readable label used in structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownEvent { .. } => "unknown_event",
            Self::Load(_) => "load",
            Self::MissingCapability { .. } => "missing_capability",
            Self::Execution(_) => "execution",
            Self::Timeout { .. } => "timeout",
            Self::ResultShape { .. } => "result_shape",
        }
    }
}

impl From<LoadError> for LifecycleError {
    fn from(error: LoadError) -> Self {
        Self::Load(Arc::new(error))
    }
}
