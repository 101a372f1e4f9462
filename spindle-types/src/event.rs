//! Kernel event records — the shared vocabulary carried on every bus.
//!
//! These are NOT a trait — they're a common record shape. The per-request
//! event bus, the channels, and the execution handle all carry
//! [`KernelEvent`]s; each layer fills in the fields it owns (channels
//! stamp `channel` and `metadata.timestamp` at publish time).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::ids::ExecutionId;

/// Normalized event type names.
///
/// The kernel reserves every type beginning with `procedure:`, `stream:`,
/// `tool:`, and `execution:`; applications may define anything else.
pub mod event_type {
    /// A request expecting a correlated response.
    pub const REQUEST: &str = "request";
    /// A response correlated to a prior request by `id`.
    pub const RESPONSE: &str = "response";
    /// Incremental progress for a long-running operation.
    pub const PROGRESS: &str = "progress";
    /// A status notification.
    pub const STATUS: &str = "status";
    /// An application-level error notification.
    pub const ERROR: &str = "error";
    /// A state snapshot changed.
    pub const STATE_CHANGED: &str = "state_changed";

    /// A tracked procedure began executing.
    pub const PROCEDURE_START: &str = "procedure:start";
    /// A tracked procedure finished successfully.
    pub const PROCEDURE_END: &str = "procedure:end";
    /// A tracked procedure failed or was cancelled.
    pub const PROCEDURE_ERROR: &str = "procedure:error";
    /// One item yielded by a streaming procedure.
    pub const STREAM_CHUNK: &str = "stream:chunk";

    /// Matches every event type on a bus subscription.
    pub const WILDCARD: &str = "*";
}

/// Routing hints interpreted by the transport layer.
///
/// Rooms are opaque strings; the kernel does not interpret them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTarget {
    /// Deliver only to this transport connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Deliver to these transport rooms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms: Option<Vec<String>>,
    /// Skip the connection that originated the event.
    #[serde(default)]
    pub exclude_sender: bool,
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Stamped by the channel at publish time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Component that emitted the event (e.g. `engine`, `tool`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The execution the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    /// Monotonic tick for transports that resequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
    /// Connection the event arrived on, for inbound events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_connection_id: Option<String>,
    /// Anything else the application attaches.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A record carried on the per-request bus and on pub/sub channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelEvent {
    /// Normalized event type (see [`event_type`]).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Correlation id for request/response pairing; optional otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Channel name the event is addressed to; overwritten at publish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Opaque payload.
    pub payload: Value,
    /// Publish-time metadata.
    #[serde(default)]
    pub metadata: EventMetadata,
    /// Optional routing hint for the transport layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<EventTarget>,
}

impl KernelEvent {
    /// Create an event with the given type and payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            id: None,
            channel: None,
            payload,
            metadata: EventMetadata::default(),
            target: None,
        }
    }

    /// Create a `request` event with a correlation id.
    #[must_use]
    pub fn request(id: impl Into<String>, payload: Value) -> Self {
        Self::new(event_type::REQUEST, payload).with_id(id)
    }

    /// Create a `response` event correlated to a prior request.
    #[must_use]
    pub fn response(id: impl Into<String>, payload: Value) -> Self {
        Self::new(event_type::RESPONSE, payload).with_id(id)
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the source component in the metadata.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Set the transport routing hint.
    #[must_use]
    pub fn with_target(mut self, target: EventTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Whether this is a `response` event with a correlation id.
    pub fn is_correlated_response(&self) -> bool {
        self.event_type == event_type::RESPONSE && self.id.is_some()
    }
}
