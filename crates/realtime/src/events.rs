//! Wire events exchanged with realtime clients.
//!
//! All events are internally tagged JSON objects; the `type` field selects
//! the variant and variant names map to snake_case event names.

use serde::{Deserialize, Serialize};
use std::fmt;

use chatrelay_database::OnlineStatus;

/// Opaque user identity as used on the wire and in room keys.
///
/// Identities compare by their string value; fan-out exclusion and
/// presence targeting rely on this equality, never on payload structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque conversation identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A conversation participant reference as carried in message payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
}

/// Conversation reference carried in message payloads. The participant set
/// is supplied by the client; the id is required only when the message has
/// to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConversationId>,
    #[serde(default)]
    pub users: Vec<Participant>,
}

/// A chat message as it travels between clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub conversation: ConversationPayload,
    pub sender: Participant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<String>,
    pub content: String,
}

/// Events received from WebSocket clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat to keep the connection alive
    Ping,
    /// Send a message into a conversation
    SendMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation: Option<ConversationPayload>,
        sender: Participant,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approach: Option<String>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Typing indicator on
    StartTyping { conversation_id: ConversationId },
    /// Typing indicator off
    StopTyping { conversation_id: ConversationId },
}

/// Events sent to WebSocket clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting after a successful connection setup
    Hello { user_id: UserId },
    /// Heartbeat response
    Pong,
    /// A message delivered to this session (confirmation or fan-out)
    MessageReceived { message: MessagePayload },
    /// Another participant started typing
    StartTyping {
        typing: bool,
        conversation_id: ConversationId,
    },
    /// Another participant stopped typing
    StopTyping {
        typing: bool,
        conversation_id: ConversationId,
    },
    /// A friend's presence changed
    PresenceChanged {
        user_id: UserId,
        status: OnlineStatus,
    },
    /// Error report, delivered to the originating session only
    Error { status: String, message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            status: "error".to_string(),
            message: message.into(),
        }
    }

    pub fn typing(conversation_id: ConversationId, typing: bool) -> Self {
        if typing {
            Self::StartTyping {
                typing,
                conversation_id,
            }
        } else {
            Self::StopTyping {
                typing,
                conversation_id,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_deserialize_from_tagged_json() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "send_message",
            "conversation": {"id": "c1", "users": [{"id": "a"}, {"id": "b"}]},
            "sender": {"id": "a"},
            "approach": "optimistic",
            "content": "hi"
        }))
        .unwrap();

        match event {
            ClientEvent::SendMessage {
                conversation,
                sender,
                approach,
                content,
                id,
            } => {
                let conversation = conversation.unwrap();
                assert_eq!(conversation.id, Some(ConversationId::from("c1")));
                assert_eq!(conversation.users.len(), 2);
                assert_eq!(sender.id, UserId::from("a"));
                assert_eq!(approach.as_deref(), Some("optimistic"));
                assert_eq!(content, "hi");
                assert!(id.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event: ClientEvent = serde_json::from_value(json!({
            "type": "start_typing",
            "conversation_id": "c1"
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::StartTyping {
                conversation_id: ConversationId::from("c1")
            }
        );
    }

    #[test]
    fn send_message_without_conversation_still_parses() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "send_message",
            "sender": {"id": "a"},
            "content": "hi"
        }))
        .unwrap();

        match event {
            ClientEvent::SendMessage { conversation, .. } => assert!(conversation.is_none()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn server_events_use_snake_case_names() {
        let value = serde_json::to_value(ServerEvent::typing(ConversationId::from("c1"), true)).unwrap();
        assert_eq!(value["type"], "start_typing");
        assert_eq!(value["typing"], true);
        assert_eq!(value["conversation_id"], "c1");

        let value = serde_json::to_value(ServerEvent::PresenceChanged {
            user_id: UserId::from("a"),
            status: OnlineStatus::Online,
        })
        .unwrap();
        assert_eq!(value["type"], "presence_changed");
        assert_eq!(value["status"], "online");
    }

    #[test]
    fn error_events_carry_the_error_status_field() {
        let value = serde_json::to_value(ServerEvent::error("bad payload")).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "bad payload");
    }
}
