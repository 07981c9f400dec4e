//! Typed events decoded from the wire.
//!
//! The SSE layer produces [`RawFrame`]s (`event` name + `data` payload); this
//! module lifts them into the [`StreamEvent`] enum the controller dispatches
//! on. Unrecognized event types are preserved as [`StreamEvent::Unknown`] so
//! new server events never break an older client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete, unparsed SSE frame: one `event:` name plus its `data:` payload.
///
/// `data` is the JSON value the payload parsed to, or `Value::String` with the
/// raw text when the payload was not valid JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Event type from the `event:` field (`message` when absent).
    pub event: String,
    /// Payload from the `data:` field(s).
    pub data: Value,
}

/// Audio chunk payload: base64 PCM labeled with a session-unique sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPayload {
    /// Base64-encoded 16-bit little-endian PCM.
    pub chunk: String,
    /// Zero-based sequence number within the session.
    pub sequence: u64,
}

/// Terminal event payload (`done` / `complete`).
///
/// Every field is optional: the server may send a bare terminal marker, or an
/// authoritative final answer with metrics attached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DonePayload {
    /// Authoritative final answer; preferred over locally accumulated text.
    pub full_answer: Option<String>,
    /// Suggestions attached to the terminal event.
    pub suggestions: Option<Value>,
    /// Server-side metrics, passed through verbatim.
    pub metrics: Option<Value>,
    /// Metadata attached to the terminal event.
    pub metadata: Option<Value>,
}

/// Application-level `error` event payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: Option<String>,
    /// Stable error code (e.g. `SESSION_BANNED`).
    pub error: Option<String>,
}

/// One decoded event from the multiplexed stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The server acknowledged the connection.
    Connected,
    /// Server-side status update (opaque payload).
    Status(Value),
    /// A text token.
    Text(Value),
    /// An audio chunk.
    Audio(AudioPayload),
    /// Follow-up suggestions (not surfaced incrementally).
    Suggestions(Value),
    /// Metadata; the most recent value wins.
    Metadata(Value),
    /// Terminal completion event.
    Done(DonePayload),
    /// Application-level error declared by the server.
    Error(ErrorPayload),
    /// The server is closing the stream.
    Close,
    /// An event type this client does not recognize.
    Unknown {
        /// Event type from the wire.
        event: String,
        /// Raw payload.
        data: Value,
    },
}

impl StreamEvent {
    /// Lift a raw frame into a typed event.
    ///
    /// Malformed payloads for a recognized type degrade to [`Self::Unknown`]
    /// rather than failing: a partially corrupt event must never take down
    /// the stream.
    pub fn from_frame(frame: RawFrame) -> Self {
        let RawFrame { event, data } = frame;
        match event.as_str() {
            "connected" => Self::Connected,
            "status" => Self::Status(data),
            "text" => Self::Text(data),
            "audio" => match serde_json::from_value::<AudioPayload>(data.clone()) {
                Ok(payload) => Self::Audio(payload),
                Err(err) => {
                    tracing::warn!("Malformed audio payload: {err}");
                    Self::Unknown { event, data }
                }
            },
            "suggestions" => Self::Suggestions(data),
            "metadata" => Self::Metadata(data),
            "done" | "complete" => {
                let payload = serde_json::from_value(data).unwrap_or_default();
                Self::Done(payload)
            }
            "error" => {
                let payload = parse_error_payload(data);
                Self::Error(payload)
            }
            "close" => Self::Close,
            _ => Self::Unknown { event, data },
        }
    }
}

fn parse_error_payload(data: Value) -> ErrorPayload {
    match data {
        Value::String(message) => ErrorPayload { message: Some(message), error: None },
        other => serde_json::from_value(other).unwrap_or_default(),
    }
}

/// Extract the token text from a `text` event payload.
///
/// Supports both a bare string and an object with a conventional content
/// field (`content`, `token` or `text`).
pub fn extract_token(data: &Value) -> Option<&str> {
    match data {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["content", "token", "text"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    }
}
