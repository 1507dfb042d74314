//! WAMP-style JSON frames spoken on the client's event websocket.
//!
//! Wire format: a JSON array `[type, topic, data?]` parsed positionally.
//! Only `Event` frames carry a dispatchable payload.

use serde_json::{Map, Value};
use std::fmt;

/// Topic carrying every JSON API resource change.
pub const JSON_API_EVENT: &str = "OnJsonApiEvent";

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Welcome = 0,
    Prefix = 1,
    Call = 2,
    CallResult = 3,
    CallError = 4,
    Subscribe = 5,
    Unsubscribe = 6,
    Publish = 7,
    Event = 8,
}

impl MessageType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Welcome),
            1 => Some(Self::Prefix),
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            5 => Some(Self::Subscribe),
            6 => Some(Self::Unsubscribe),
            7 => Some(Self::Publish),
            8 => Some(Self::Event),
            _ => None,
        }
    }
}

/// A resource change pushed by the client.
///
/// `uri` and `event_type` are lifted out of the payload for routing; the
/// payload itself is kept whole, including those two keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub uri: String,
    pub event_type: String,
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(uri: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        let uri = uri.into();
        let event_type = event_type.into();
        let mut payload = Map::new();
        payload.insert("uri".into(), Value::String(uri.clone()));
        payload.insert("eventType".into(), Value::String(event_type.clone()));
        payload.insert("data".into(), data);
        Self {
            uri,
            event_type,
            payload,
        }
    }

    /// The resource body, if the event carried one.
    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// Deserialize the resource body into a concrete type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.data().unwrap_or(&Value::Null))
    }

    /// Re-encode the full payload as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload)
    }

    fn from_payload(payload: Map<String, Value>) -> Result<Self, FrameError> {
        let uri = string_field(&payload, "uri")?;
        let event_type = string_field(&payload, "eventType")?;
        Ok(Self {
            uri,
            event_type,
            payload,
        })
    }
}

fn string_field(payload: &Map<String, Value>, key: &'static str) -> Result<String, FrameError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(FrameError::MissingField(key))
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Event { topic: String, event: Event },
    /// Any other message type, kept opaque.
    Other { kind: MessageType, args: Vec<Value> },
}

/// Reasons an inbound frame could not be decoded.
#[derive(Debug)]
pub enum FrameError {
    Json(serde_json::Error),
    Empty,
    UnknownType(Value),
    MissingTopic,
    MissingData,
    MissingField(&'static str),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid frame json: {}", e),
            Self::Empty => write!(f, "empty frame"),
            Self::UnknownType(v) => write!(f, "unknown message type: {}", v),
            Self::MissingTopic => write!(f, "frame has no topic"),
            Self::MissingData => write!(f, "event frame has no data object"),
            Self::MissingField(key) => write!(f, "event data has no string '{}'", key),
        }
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    /// Decode a text message into a frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let parts: Vec<Value> = serde_json::from_str(text).map_err(FrameError::Json)?;
        let mut parts = parts.into_iter();

        let code = parts.next().ok_or(FrameError::Empty)?;
        let kind = code
            .as_u64()
            .and_then(|c| u8::try_from(c).ok())
            .and_then(MessageType::from_u8)
            .ok_or_else(|| FrameError::UnknownType(code.clone()))?;

        match kind {
            MessageType::Subscribe | MessageType::Unsubscribe | MessageType::Event => {
                let topic = match parts.next() {
                    Some(Value::String(topic)) => topic,
                    _ => return Err(FrameError::MissingTopic),
                };
                match kind {
                    MessageType::Subscribe => Ok(Self::Subscribe { topic }),
                    MessageType::Unsubscribe => Ok(Self::Unsubscribe { topic }),
                    _ => match parts.next() {
                        Some(Value::Object(payload)) => Ok(Self::Event {
                            topic,
                            event: Event::from_payload(payload)?,
                        }),
                        _ => Err(FrameError::MissingData),
                    },
                }
            }
            other => Ok(Self::Other {
                kind: other,
                args: parts.collect(),
            }),
        }
    }
}

/// Outbound subscription management frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Subscribe(String),
    Unsubscribe(String),
}

impl ControlFrame {
    pub fn subscribe_json_api() -> Self {
        Self::Subscribe(JSON_API_EVENT.to_string())
    }

    pub fn unsubscribe_json_api() -> Self {
        Self::Unsubscribe(JSON_API_EVENT.to_string())
    }

    /// Encode as the JSON text sent on the wire.
    pub fn encode(&self) -> String {
        let (kind, topic) = match self {
            Self::Subscribe(topic) => (MessageType::Subscribe, topic),
            Self::Unsubscribe(topic) => (MessageType::Unsubscribe, topic),
        };
        Value::Array(vec![Value::from(kind as u8), Value::from(topic.as_str())]).to_string()
    }
}
