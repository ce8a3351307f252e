//! Wire protocol types for host-caller communication.
//!
//! The protocol is a line-delimited JSON exchange over stdio. The caller
//! writes one [`EventRequest`] per line to the host's stdin. For every request
//! the host writes zero or more `StandardOutput` lines carrying console output
//! from the handler, followed by exactly one terminal [`EventResponse`] line.
//! Free-text diagnostics go to stderr and are not part of the protocol.
//!
//! ```json
//! {"Event": "OnCreate", "Data": {"foo": "20"}}
//! ```
//!
//! ```json
//! {"Event": "StandardOutput", "Status": "ok", "Data": "creating"}
//! {"Event": "OnCreate", "Status": "ok", "Data": "{\"initialized_foo\": 20.0}"}
//! ```
//!
//! Field names are capitalised and responses are encoded with the separators
//! and ASCII escaping produced by [`encoding::to_compat_string`], which keeps
//! the output byte-compatible with existing callers.

pub mod encoding;
mod writer;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

pub use self::writer::ProtocolWriter;

/// Payload carried by a request: a JSON object with arbitrary values.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Event name used for streamed console output.
pub const STANDARD_OUTPUT_EVENT: &str = "StandardOutput";

/// Fixed `Data` marker carried by every error response.
pub const ERROR_MARKER: &str = "see error log for details";

/// The three lifecycle entry points a handler may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// `OnCreate`, served by `on_create(data)`.
    Create,
    /// `OnReceive`, served by `on_receive(data)`.
    Receive,
    /// `OnDestroy`, served by `on_destroy()`.
    Destroy,
}

impl Lifecycle {
    /// Every lifecycle entry point, in declaration order.
    pub const ALL: [Self; 3] = [Self::Create, Self::Receive, Self::Destroy];

    /// Protocol event name (`OnCreate`, `OnReceive`, `OnDestroy`).
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Create => "OnCreate",
            Self::Receive => "OnReceive",
            Self::Destroy => "OnDestroy",
        }
    }

    /// Name of the handler function implementing this entry point.
    #[must_use]
    pub const fn function_name(self) -> &'static str {
        match self {
            Self::Create => "on_create",
            Self::Receive => "on_receive",
            Self::Destroy => "on_destroy",
        }
    }

    /// Whether the entry point receives the request payload.
    #[must_use]
    pub const fn takes_payload(self) -> bool {
        !matches!(self, Self::Destroy)
    }

    /// Number of parameters the handler function must declare.
    #[must_use]
    pub const fn arity(self) -> usize {
        if self.takes_payload() { 1 } else { 0 }
    }

    /// Resolves a protocol event name.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|lifecycle| lifecycle.event_name() == name)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Classification of a request's `Event` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// One of the recognised lifecycle events.
    Lifecycle(Lifecycle),
    /// Any other event name, kept verbatim for error reporting.
    Unknown(String),
}

impl EventKind {
    /// Classifies a raw event name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        Lifecycle::from_event_name(name)
            .map_or_else(|| Self::Unknown(name.to_owned()), Self::Lifecycle)
    }
}

/// Request read from the host's stdin.
///
/// # Example
///
/// ```
/// use lifecycle_host::protocol::{EventKind, EventRequest, Lifecycle};
///
/// let request = EventRequest::parse(r#"{"Event":"OnReceive","Data":{"bar":"10"}}"#)
///     .expect("request should parse");
/// assert_eq!(request.kind(), EventKind::Lifecycle(Lifecycle::Receive));
/// assert!(request.data().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRequest {
    #[serde(rename = "Event")]
    event: String,
    #[serde(rename = "Data", default)]
    data: Option<Payload>,
}

impl EventRequest {
    /// Creates a request for the given event name and payload.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Option<Payload>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Decodes one protocol line.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Protocol`] when the line is not a JSON object
    /// with a string `Event` field and an object, null, or absent `Data`
    /// field. Protocol violations are fatal to the dispatch loop.
    pub fn parse(line: &str) -> Result<Self, DispatchError> {
        let violation = |source| DispatchError::Protocol {
            line: line.to_owned(),
            source,
        };
        // Derived struct decoding also accepts sequences, so require an
        // object before mapping fields.
        let object: Payload = serde_json::from_str(line.trim()).map_err(violation)?;
        serde_json::from_value(serde_json::Value::Object(object)).map_err(violation)
    }

    /// Raw event name.
    #[must_use]
    pub const fn event(&self) -> &str {
        self.event.as_str()
    }

    /// Classified event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event)
    }

    /// Request payload, if one was supplied.
    #[must_use]
    pub const fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    /// Consumes the request, returning its payload.
    #[must_use]
    pub fn into_data(self) -> Option<Payload> {
        self.data
    }
}

/// Status attached to every response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The event completed, or the line carries streamed output.
    Ok,
    /// The event failed; details are on the diagnostic stream.
    Error,
}

/// Response line written to the host's stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResponse {
    #[serde(rename = "Event")]
    event: String,
    #[serde(rename = "Status")]
    status: ResponseStatus,
    #[serde(rename = "Data")]
    data: String,
}

impl EventResponse {
    /// Builds a successful response whose `Data` is the encoded result map.
    ///
    /// The result is encoded to a JSON string which is then embedded as a
    /// string value, so callers decode `Data` a second time.
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be encoded.
    pub fn result(event: impl Into<String>, result: &Payload) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.into(),
            status: ResponseStatus::Ok,
            data: encoding::to_compat_string(result)?,
        })
    }

    /// Builds the fixed error response for an event.
    #[must_use]
    pub fn error(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            status: ResponseStatus::Error,
            data: ERROR_MARKER.to_owned(),
        }
    }

    /// Event name.
    #[must_use]
    pub const fn event(&self) -> &str {
        self.event.as_str()
    }

    /// Response status.
    #[must_use]
    pub const fn status(&self) -> ResponseStatus {
        self.status
    }

    /// Raw `Data` string.
    #[must_use]
    pub const fn data(&self) -> &str {
        self.data.as_str()
    }
}

/// One line of console output produced by a handler during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    line: String,
}

impl OutputEvent {
    /// Wraps a captured line of text.
    #[must_use]
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    /// Captured text.
    #[must_use]
    pub const fn line(&self) -> &str {
        self.line.as_str()
    }
}

impl From<OutputEvent> for EventResponse {
    fn from(event: OutputEvent) -> Self {
        Self {
            event: STANDARD_OUTPUT_EVENT.to_owned(),
            status: ResponseStatus::Ok,
            data: event.line,
        }
    }
}

/// Result substituted when a handler returns nothing.
#[must_use]
pub fn default_result() -> Payload {
    let mut result = Payload::new();
    result.insert(
        String::from("status"),
        serde_json::Value::String(String::from("default")),
    );
    result.insert(
        String::from("message"),
        serde_json::Value::String(String::from("No result generated")),
    );
    result
}

#[cfg(test)]
mod tests;
