use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame sent from client to server: `{"event": "<name>", "data": <payload>}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "typing")]
    Typing,
    #[serde(rename = "stop typing")]
    StopTyping,
    /// Carries the message object exactly as the sender submitted it
    #[serde(rename = "message received")]
    MessageReceived(Value),
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Typing => "typing",
            Self::StopTyping => "stop typing",
            Self::MessageReceived(_) => "message received",
            Self::Error { .. } => "error",
        }
    }
}

/// What the per-connection send task pulls off its queue
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Event(ServerEvent),
    /// JSON serialized once and shared between many recipients
    Preserialized(Arc<str>),
    /// Transport-level liveness probe
    Ping,
}

impl OutboundMessage {
    /// Serialize to the JSON text frame, `None` for control frames
    pub fn to_json(&self) -> Result<Option<String>, serde_json::Error> {
        match self {
            Self::Event(event) => serde_json::to_string(event).map(Some),
            Self::Preserialized(json) => Ok(Some(json.to_string())),
            Self::Ping => Ok(None),
        }
    }

    /// Build a shareable message by serializing `event` up front
    pub fn preserialize(event: &ServerEvent) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(event)?;
        Ok(Self::Preserialized(Arc::from(json)))
    }
}
