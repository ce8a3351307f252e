//! Sequential event dispatch loop.
//!
//! The [`Dispatcher`] reads one protocol line at a time, runs the matching
//! handler entry point and writes exactly one terminal response for it. Any
//! console output the handler produces while the event is in flight is
//! streamed ahead of that response as `StandardOutput` lines.
//!
//! The handler is loaded by the first lifecycle call, on the call thread and
//! under the same deadline, so slow initialisation times out like any other
//! call. The load slot stays locked while loading; an event arriving while an
//! abandoned load is still running waits on it inside its own deadline.
//!
//! Per-event failures are written to the diagnostic stream followed by a
//! blank line, and the event is answered with the fixed error response. Only
//! undecodable input and failures of the output stream itself stop the loop.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, LifecycleError, LoadError};
use crate::executor::{ExecutionOutcome, TimeoutExecutor};
use crate::interceptor::{Interception, OutputInterceptor};
use crate::loader::{HandlerLoader, LifecycleHandler};
use crate::protocol::encoding::to_compat_string;
use crate::protocol::{
    EventKind, EventRequest, EventResponse, Lifecycle, Payload, ProtocolWriter, default_result,
};

/// Tracing target for dispatch operations.
const DISPATCH_TARGET: &str = "lifecycle_host::dispatch";

/// Load state of the handler, shared with call threads.
enum HandlerSlot {
    /// Nothing loaded yet, or the last attempt may be retried.
    Empty,
    /// The handler loaded and initialised.
    Ready(Arc<dyn LifecycleHandler>),
    /// Loading failed for good; every later event reports this failure.
    Broken(Arc<LoadError>),
}

/// Drives lifecycle events from an input stream to a lazily loaded handler.
pub struct Dispatcher<L, D> {
    loader: Arc<L>,
    slot: Arc<Mutex<HandlerSlot>>,
    executor: TimeoutExecutor,
    output: ProtocolWriter,
    interceptor: OutputInterceptor,
    diagnostics: D,
}

impl<L, D> Dispatcher<L, D>
where
    L: HandlerLoader + Send + Sync + 'static,
    D: Write,
{
    /// Creates a dispatcher.
    ///
    /// Responses and captured output share `output`; diagnostics are written
    /// to `diagnostics`. No handler is loaded until the first lifecycle event.
    #[must_use]
    pub fn new(
        loader: L,
        executor: TimeoutExecutor,
        output: ProtocolWriter,
        diagnostics: D,
    ) -> Self {
        Self {
            loader: Arc::new(loader),
            slot: Arc::new(Mutex::new(HandlerSlot::Empty)),
            executor,
            interceptor: OutputInterceptor::new(output.clone()),
            output,
            diagnostics,
        }
    }

    /// Whether the handler has been loaded.
    ///
    /// Reports `false` while a load is still in progress.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        match self.slot.try_lock() {
            Ok(slot) => matches!(*slot, HandlerSlot::Ready(_)),
            Err(TryLockError::Poisoned(poisoned)) => {
                matches!(*poisoned.into_inner(), HandlerSlot::Ready(_))
            }
            Err(TryLockError::WouldBlock) => false,
        }
    }

    /// Processes lines from `input` until it is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when a line cannot be decoded, when input
    /// cannot be read, or when writing to the output stream fails.
    pub fn run(&mut self, input: impl BufRead) -> Result<(), DispatchError> {
        for line in input.lines() {
            self.dispatch_line(&line?)?;
        }
        info!(target: DISPATCH_TARGET, "input closed");
        Ok(())
    }

    /// Processes one protocol line.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the line cannot be decoded or a
    /// response cannot be written. Handler failures are not errors here:
    /// they are reported and answered with an error response.
    pub fn dispatch_line(&mut self, line: &str) -> Result<(), DispatchError> {
        let request = EventRequest::parse(line)?;
        let event = request.event().to_owned();
        debug!(target: DISPATCH_TARGET, event = %event, "dispatching event");

        let response = match self.handle(request)? {
            Ok(result) => EventResponse::result(event.as_str(), &result)?,
            Err(error) => {
                self.report(&event, &error)?;
                EventResponse::error(event.as_str())
            }
        };
        self.output.write_response(&response)
    }

    fn handle(
        &self,
        request: EventRequest,
    ) -> Result<Result<Payload, LifecycleError>, DispatchError> {
        let lifecycle = match request.kind() {
            EventKind::Lifecycle(lifecycle) => lifecycle,
            EventKind::Unknown(event) => return Ok(Err(LifecycleError::UnknownEvent { event })),
        };

        let interception = self.interceptor.intercept();
        let outcome = self.invoke(lifecycle, request.into_data(), &interception);
        interception.finish()?;
        Ok(outcome)
    }

    fn invoke(
        &self,
        lifecycle: Lifecycle,
        payload: Option<Payload>,
        interception: &Interception,
    ) -> Result<Payload, LifecycleError> {
        let loader = Arc::clone(&self.loader);
        let slot = Arc::clone(&self.slot);
        let capture = interception.capture();
        let outcome = self.executor.run(lifecycle.function_name(), move || {
            let _installed = capture.install();
            let handler = match resolve_handler(loader.as_ref(), &slot) {
                Ok(handler) => handler,
                Err(error) => return Ok(Err(error)),
            };
            if !handler.capabilities().contains(lifecycle) {
                return Ok(Err(LifecycleError::MissingCapability { lifecycle }));
            }
            handler.invoke(lifecycle, payload).map(Ok)
        });

        match outcome {
            ExecutionOutcome::Completed(Ok(value)) => into_result(value),
            ExecutionOutcome::Completed(Err(error)) => Err(error),
            ExecutionOutcome::Timeout => Err(LifecycleError::Timeout {
                timeout: self.executor.deadline(),
            }),
            ExecutionOutcome::Failure(failure) => Err(LifecycleError::Execution(failure)),
        }
    }

    fn report(&mut self, event: &str, error: &LifecycleError) -> Result<(), DispatchError> {
        warn!(
            target: DISPATCH_TARGET,
            event,
            kind = error.kind(),
            %error,
            "event failed"
        );
        writeln!(self.diagnostics, "{}\n", error.diagnostic())?;
        self.diagnostics.flush()?;
        Ok(())
    }
}

impl<L, D> std::fmt::Debug for Dispatcher<L, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Returns the loaded handler, loading it first if needed.
///
/// The slot lock is held across the load so initialisation runs at most once.
fn resolve_handler<L>(
    loader: &L,
    shared: &Mutex<HandlerSlot>,
) -> Result<Arc<dyn LifecycleHandler>, LifecycleError>
where
    L: HandlerLoader + ?Sized,
{
    let mut slot = shared.lock().unwrap_or_else(PoisonError::into_inner);
    match &*slot {
        HandlerSlot::Ready(handler) => return Ok(Arc::clone(handler)),
        HandlerSlot::Broken(failure) => return Err(LifecycleError::Load(Arc::clone(failure))),
        HandlerSlot::Empty => {}
    }

    match loader.load() {
        Ok(handler) => {
            *slot = HandlerSlot::Ready(Arc::clone(&handler));
            Ok(handler)
        }
        Err(error) if error.is_retryable() => {
            debug!(target: DISPATCH_TARGET, %error, "handler load will be retried");
            Err(error.into())
        }
        Err(error) => {
            let failure = Arc::new(error);
            *slot = HandlerSlot::Broken(Arc::clone(&failure));
            Err(LifecycleError::Load(failure))
        }
    }
}

fn into_result(value: Option<Value>) -> Result<Payload, LifecycleError> {
    match value {
        None => Ok(default_result()),
        Some(Value::Object(result)) => Ok(result),
        Some(other) => Err(LifecycleError::ResultShape {
            type_name: json_type_name(&other),
            rendered: to_compat_string(&other).unwrap_or_else(|_| other.to_string()),
        }),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
