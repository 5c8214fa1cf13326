//! Real-time event and the envelope that carries it between instances.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Event pushed to WebSocket clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Event type, e.g. `"message.created"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RealtimeEvent {
    /// Event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            data,
        }
    }
}

/// What goes over the broker channel: the event plus the instance that
/// emitted it, so that instance can skip its own echo.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FanOutEnvelope {
    /// Emitting instance.
    pub origin: String,
    /// The event.
    pub event: RealtimeEvent,
}

impl FanOutEnvelope {
    /// JSON bytes for publishing.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Parse a received payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
