//! Crate-level test support and behaviour tests.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::executor::CallFailure;
use crate::loader::{Capabilities, LifecycleHandler};
use crate::protocol::{EventResponse, Lifecycle, Payload};


/// In-memory sink shared between the code under test and assertions.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

    pub(crate) fn responses(&self) -> Vec<EventResponse> {
        self.lines()
            .iter()
            .map(|line| serde_json::from_str(line).expect("response line should decode"))
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink whose every write fails.
pub(crate) struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type Behaviour =
    dyn Fn(Lifecycle, Option<Payload>) -> Result<Option<Value>, CallFailure> + Send + Sync;

/// Handler double whose entry points run a closure.
pub(crate) struct StubHandler {
    capabilities: Capabilities,
    behaviour: Box<Behaviour>,
}

impl StubHandler {
    pub(crate) fn new(
        capabilities: impl IntoIterator<Item = Lifecycle>,
        behaviour: impl Fn(Lifecycle, Option<Payload>) -> Result<Option<Value>, CallFailure>
        + Send
        + Sync
        + 'static,
    ) -> Arc<dyn LifecycleHandler> {
        Arc::new(Self {
            capabilities: capabilities.into_iter().collect(),
            behaviour: Box::new(behaviour),
        })
    }

    /// Handler implementing every entry point and returning `result`.
    pub(crate) fn returning(result: Option<Value>) -> Arc<dyn LifecycleHandler> {
        Self::new(Lifecycle::ALL, move |_, _| Ok(result.clone()))
    }
}

impl LifecycleHandler for StubHandler {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn invoke(
        &self,
        lifecycle: Lifecycle,
        payload: Option<Payload>,
    ) -> Result<Option<Value>, CallFailure> {
        (self.behaviour)(lifecycle, payload)
    }
}

pub(crate) fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub(crate) fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object fixture, got {other}"),
    }
}
