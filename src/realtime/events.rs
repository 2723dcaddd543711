//! Typed inbound events and payload validation.
//!
//! Clients send `(name, payload)` pairs; everything past this module works
//! with [`InboundEvent`] only. Payloads that do not match the expected shape
//! become an [`EventError`] and the event is dropped.

use serde::Deserialize;
use serde_json::Value;

pub const SETUP: &str = "setup";
pub const JOIN_CHAT: &str = "join chat";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stop typing";
pub const NEW_MESSAGE: &str = "new message";
pub const DISCONNECT: &str = "disconnect";

/// Applies to room ids and to user ids, which name personal rooms
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Events the dispatcher understands
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// `user_id` is `None` when the client sent no usable id
    Setup { user_id: Option<String> },
    JoinChat { room: String },
    Typing { room: String },
    StopTyping { room: String },
    NewMessage(NewMessage),
    /// Raised by the transport, never parsed from a client frame
    Disconnect(DisconnectReason),
}

impl InboundEvent {
    /// Parse a named client event. `disconnect` is reserved for the transport.
    pub fn from_frame(name: &str, payload: Value) -> Result<Self, EventError> {
        match name {
            SETUP => parse_setup(&payload),
            JOIN_CHAT => parse_room(JOIN_CHAT, &payload).map(|room| Self::JoinChat { room }),
            TYPING => parse_room(TYPING, &payload).map(|room| Self::Typing { room }),
            STOP_TYPING => parse_room(STOP_TYPING, &payload).map(|room| Self::StopTyping { room }),
            NEW_MESSAGE => NewMessage::from_payload(payload).map(Self::NewMessage),
            other => Err(EventError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup { .. } => SETUP,
            Self::JoinChat { .. } => JOIN_CHAT,
            Self::Typing { .. } => TYPING,
            Self::StopTyping { .. } => STOP_TYPING,
            Self::NewMessage(_) => NEW_MESSAGE,
            Self::Disconnect(_) => DISCONNECT,
        }
    }
}

/// Why a connection went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client closed the socket
    Closed,
    /// Socket read failed
    TransportError,
    /// No liveness signal within the configured timeout
    IdleTimeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::TransportError => "transport_error",
            Self::IdleTimeout => "idle_timeout",
        }
    }
}

/// A validated `new message` payload
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: String,
    /// `chat.users[]._id` in payload order
    pub participants: Vec<String>,
    /// Untouched payload, relayed as-is
    pub payload: Value,
}

#[derive(Deserialize)]
struct MessageShape {
    chat: Option<ChatShape>,
    sender: Option<UserRef>,
}

#[derive(Deserialize)]
struct ChatShape {
    users: Option<Vec<UserRef>>,
}

#[derive(Deserialize)]
struct UserRef {
    #[serde(rename = "_id")]
    id: String,
}

impl NewMessage {
    pub fn from_payload(payload: Value) -> Result<Self, EventError> {
        let shape = MessageShape::deserialize(&payload)
            .map_err(|e| EventError::invalid(NEW_MESSAGE, e.to_string()))?;

        let users = shape
            .chat
            .and_then(|chat| chat.users)
            .ok_or(EventError::MissingChatUsers)?;
        let sender = shape.sender.ok_or(EventError::MissingSender)?;

        Ok(Self {
            sender_id: sender.id,
            participants: users.into_iter().map(|user| user.id).collect(),
            payload,
        })
    }

    /// Participants other than the sender, each listed once
    pub fn recipients(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.participants
            .iter()
            .map(String::as_str)
            .filter(|id| *id != self.sender_id && seen.insert(*id))
            .collect()
    }
}

/// Reasons an inbound event is dropped before handling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Unknown event '{0}'")]
    UnknownEvent(String),

    #[error("Invalid payload for '{event}': {reason}")]
    InvalidPayload { event: &'static str, reason: String },

    #[error("chat.users not defined")]
    MissingChatUsers,

    #[error("sender._id not defined")]
    MissingSender,
}

impl EventError {
    fn invalid(event: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            event,
            reason: reason.into(),
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownEvent(_) => "unknown_event",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::MissingChatUsers => "missing_chat_users",
            Self::MissingSender => "missing_sender",
        }
    }
}

/// `setup` accepts `null`, `{}`, `{"_id": null}` or `{"_id": "<id>"}`.
/// The id names the user's personal room, so it follows the room id rules.
fn parse_setup(payload: &Value) -> Result<InboundEvent, EventError> {
    let user_id = match payload {
        Value::Null => None,
        Value::Object(fields) => match fields.get("_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if id.is_empty() => None,
            Some(Value::String(id)) if is_valid_room_id(id) => Some(id.clone()),
            Some(Value::String(id)) => return Err(EventError::invalid(SETUP, rejected_id(id))),
            Some(other) => {
                return Err(EventError::invalid(
                    SETUP,
                    format!("_id must be a string, got {}", json_type(other)),
                ))
            }
        },
        other => {
            return Err(EventError::invalid(
                SETUP,
                format!("expected an object, got {}", json_type(other)),
            ))
        }
    };

    Ok(InboundEvent::Setup { user_id })
}

fn parse_room(event: &'static str, payload: &Value) -> Result<String, EventError> {
    match payload {
        Value::String(room) if is_valid_room_id(room) => Ok(room.clone()),
        Value::String(room) => Err(EventError::invalid(event, rejected_id(room))),
        other => Err(EventError::invalid(
            event,
            format!("expected a room id string, got {}", json_type(other)),
        )),
    }
}

/// Room ids are opaque, but must be non-empty, bounded and printable
pub fn is_valid_room_id(room: &str) -> bool {
    !room.is_empty() && room.len() <= MAX_ROOM_ID_LEN && !room.chars().any(char::is_control)
}

/// Rejection reason that never repeats client text into logs
fn rejected_id(id: &str) -> String {
    format!(
        "id must be 1-{} bytes without control characters, got {} bytes",
        MAX_ROOM_ID_LEN,
        id.len()
    )
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_variants() {
        assert_eq!(
            InboundEvent::from_frame("setup", json!({"_id": "u1", "name": "Ann"})),
            Ok(InboundEvent::Setup { user_id: Some("u1".to_string()) })
        );
        for payload in [json!(null), json!({}), json!({"_id": null}), json!({"_id": ""})] {
            assert_eq!(
                InboundEvent::from_frame("setup", payload),
                Ok(InboundEvent::Setup { user_id: None })
            );
        }
        assert!(matches!(
            InboundEvent::from_frame("setup", json!("u1")),
            Err(EventError::InvalidPayload { event: "setup", .. })
        ));
        assert!(matches!(
            InboundEvent::from_frame("setup", json!({"_id": 42})),
            Err(EventError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_room_events() {
        assert_eq!(
            InboundEvent::from_frame("join chat", json!("room1")),
            Ok(InboundEvent::JoinChat { room: "room1".to_string() })
        );
        assert_eq!(
            InboundEvent::from_frame("typing", json!("room1")),
            Ok(InboundEvent::Typing { room: "room1".to_string() })
        );
        assert_eq!(
            InboundEvent::from_frame("stop typing", json!("room1")),
            Ok(InboundEvent::StopTyping { room: "room1".to_string() })
        );
    }

    #[test]
    fn test_invalid_room_ids() {
        assert!(InboundEvent::from_frame("join chat", json!("")).is_err());
        assert!(InboundEvent::from_frame("join chat", json!(null)).is_err());
        assert!(InboundEvent::from_frame("typing", json!(17)).is_err());
        assert!(InboundEvent::from_frame("typing", json!("a\nb")).is_err());
        assert!(InboundEvent::from_frame("typing", json!("r".repeat(129))).is_err());
    }

    #[test]
    fn test_setup_ids_follow_room_id_rules() {
        let longest = "u".repeat(MAX_ROOM_ID_LEN);
        assert_eq!(
            InboundEvent::from_frame("setup", json!({"_id": longest.clone()})),
            Ok(InboundEvent::Setup { user_id: Some(longest.clone()) })
        );
        assert_eq!(
            InboundEvent::from_frame("join chat", json!(longest.clone())),
            Ok(InboundEvent::JoinChat { room: longest })
        );

        for id in ["x".repeat(MAX_ROOM_ID_LEN + 1), "u1\nINFO forged line".to_string()] {
            assert!(matches!(
                InboundEvent::from_frame("setup", json!({"_id": id})),
                Err(EventError::InvalidPayload { event: "setup", .. })
            ));
        }
    }

    #[test]
    fn test_rejection_reason_does_not_echo_id() {
        let hostile = format!("evil\n{}", "r".repeat(300));
        let Err(EventError::InvalidPayload { reason, .. }) =
            InboundEvent::from_frame("join chat", json!(hostile))
        else {
            panic!("expected an invalid payload");
        };
        assert!(!reason.contains("evil"));
        assert!(!reason.contains('\n'));
        assert!(reason.contains("305 bytes"));
    }

    #[test]
    fn test_unknown_and_reserved_names() {
        assert_eq!(
            InboundEvent::from_frame("leave chat", json!("room1")),
            Err(EventError::UnknownEvent("leave chat".to_string()))
        );
        assert_eq!(
            InboundEvent::from_frame("disconnect", json!(null)),
            Err(EventError::UnknownEvent("disconnect".to_string()))
        );
    }

    #[test]
    fn test_new_message_keeps_payload() {
        let payload = json!({
            "_id": "m1",
            "content": "hello",
            "chat": {"_id": "c1", "chatName": "team", "users": [{"_id": "u1"}, {"_id": "u2"}]},
            "sender": {"_id": "u1", "name": "Ann"}
        });
        let message = NewMessage::from_payload(payload.clone()).unwrap();
        assert_eq!(message.sender_id, "u1");
        assert_eq!(message.participants, vec!["u1", "u2"]);
        assert_eq!(message.payload, payload);
        assert_eq!(message.recipients(), vec!["u2"]);
    }

    #[test]
    fn test_new_message_without_chat_users() {
        assert_eq!(
            NewMessage::from_payload(json!({"chat": {}, "sender": {"_id": "u1"}})),
            Err(EventError::MissingChatUsers)
        );
        assert_eq!(
            NewMessage::from_payload(json!({"sender": {"_id": "u1"}})),
            Err(EventError::MissingChatUsers)
        );
        assert_eq!(
            NewMessage::from_payload(json!({"chat": {"users": [{"_id": "u1"}]}})),
            Err(EventError::MissingSender)
        );
        assert!(matches!(
            NewMessage::from_payload(json!({"chat": {"users": "u1"}, "sender": {"_id": "u1"}})),
            Err(EventError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_recipients_skip_sender_and_duplicates() {
        let message = NewMessage::from_payload(json!({
            "chat": {"users": [{"_id": "u1"}, {"_id": "u2"}, {"_id": "u3"}, {"_id": "u3"}]},
            "sender": {"_id": "u2"}
        }))
        .unwrap();
        assert_eq!(message.recipients(), vec!["u1", "u3"]);
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(EventError::MissingChatUsers.label(), "missing_chat_users");
        assert_eq!(EventError::UnknownEvent("x".into()).label(), "unknown_event");
    }
}
