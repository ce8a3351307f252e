//! Deadline-bounded execution of lifecycle calls.
//!
//! [`TimeoutExecutor`] runs each call on its own named thread and waits for
//! the result with [`mpsc::Receiver::recv_timeout`]. When the deadline
//! elapses the caller gets [`ExecutionOutcome::Timeout`] and moves on, but the
//! thread is left running: Rust offers no way to pre-empt it, so a call that
//! never returns keeps running in the background until the process exits.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::traceback::Traceback;

/// Tracing target for call execution.
const EXECUTOR_TARGET: &str = "lifecycle_host::executor";

/// An error raised by handler code during a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallFailure {
    message: String,
    traceback: Traceback,
}

impl CallFailure {
    /// Creates a failure without traceback frames.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: Traceback::default(),
        }
    }

    /// Attaches the frames that led to the failure.
    #[must_use]
    pub fn with_traceback(mut self, traceback: Traceback) -> Self {
        self.traceback = traceback;
        self
    }

    /// Root-cause message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Filtered frames.
    #[must_use]
    pub const fn traceback(&self) -> &Traceback {
        &self.traceback
    }
}

/// Result of running one call under a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome<T> {
    /// The call returned before the deadline.
    Completed(T),
    /// The deadline elapsed first; the call may still be running.
    Timeout,
    /// The call raised an error or panicked.
    Failure(CallFailure),
}

/// Runs calls on detached threads under a fixed deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutExecutor {
    deadline: Duration,
}

impl TimeoutExecutor {
    /// Creates an executor enforcing `deadline` on every call.
    #[must_use]
    pub const fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Deadline applied to each call.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Runs `call` on a new thread and waits for it up to the deadline.
    ///
    /// `label` names the thread (`lifecycle-<label>`) and appears in logs. A
    /// panic inside `call` is reported as [`ExecutionOutcome::Failure`]. If the
    /// thread cannot be spawned the failure is reported the same way.
    pub fn run<T, F>(&self, label: &str, call: F) -> ExecutionOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, CallFailure> + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        let spawned = thread::Builder::new()
            .name(format!("lifecycle-{label}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(call))
                    .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
                // The receiver is gone once the caller has timed out.
                drop(sender.send(result));
            });

        if let Err(error) = spawned {
            return ExecutionOutcome::Failure(CallFailure::new(format!(
                "failed to spawn call thread: {error}"
            )));
        }

        let started = Instant::now();
        match receiver.recv_timeout(self.deadline) {
            Ok(Ok(value)) => {
                debug!(
                    target: EXECUTOR_TARGET,
                    call = label,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "call completed"
                );
                ExecutionOutcome::Completed(value)
            }
            Ok(Err(failure)) => ExecutionOutcome::Failure(failure),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: EXECUTOR_TARGET,
                    call = label,
                    deadline = ?self.deadline,
                    "call exceeded deadline; leaving thread detached"
                );
                ExecutionOutcome::Timeout
            }
            Err(RecvTimeoutError::Disconnected) => ExecutionOutcome::Failure(CallFailure::new(
                "call thread exited without reporting a result",
            )),
        }
    }
}

fn panicked(payload: &(dyn Any + Send)) -> CallFailure {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic payload"));
    CallFailure::new(format!("handler call panicked: {detail}"))
}
