use std::time::{SystemTime, UNIX_EPOCH};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    Event = 3,
    ErrorResponse = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => MessageType::Request,
            2 => MessageType::Response,
            3 => MessageType::Event,
            4 => MessageType::ErrorResponse,
            code => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "unknown message type {}",
                    code
                )))
            }
        })
    }
}

impl Serialize for MessageType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        MessageType::try_from(u8::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

/// Payload of [MessageType::ErrorResponse].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMessage", into = "RawMessage")]
pub struct Message {
    pub kind: MessageType,
    pub request_id: u64,
    pub method: String,
    pub payload: Value,
    /// Unix milliseconds.
    pub timestamp: u64,
}

type RawMessage = (MessageType, u64, String, Value, u64);

impl From<RawMessage> for Message {
    fn from((kind, request_id, method, payload, timestamp): RawMessage) -> Self {
        Message {
            kind,
            request_id,
            method,
            payload,
            timestamp,
        }
    }
}

impl From<Message> for RawMessage {
    fn from(m: Message) -> Self {
        (m.kind, m.request_id, m.method, m.payload, m.timestamp)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

impl Message {
    pub fn new(kind: MessageType, request_id: u64, method: impl Into<String>, payload: Value) -> Self {
        Message {
            kind,
            request_id,
            method: method.into(),
            payload,
            timestamp: now_ms(),
        }
    }

    pub fn request(request_id: u64, method: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageType::Request, request_id, method, payload)
    }

    pub fn response(request_id: u64, method: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageType::Response, request_id, method, payload)
    }

    pub fn event(method: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageType::Event, 0, method, payload)
    }

    pub fn error_response(request_id: u64, method: impl Into<String>, error: impl Into<String>) -> Self {
        let payload = serde_json::json!({ "error": error.into() });
        Self::new(MessageType::ErrorResponse, request_id, method, payload)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }

    /// The node's message of an error response. Falls back to the raw
    /// payload if it doesn't have the expected shape.
    pub fn error_text(&self) -> String {
        match serde_json::from_value::<ErrorPayload>(self.payload.clone()) {
            Ok(p) => p.error,
            Err(_) => self.payload.to_string(),
        }
    }
}
