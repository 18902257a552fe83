//! Message router: validates, optionally persists, and fans out inbound
//! messages.

use std::sync::Arc;

use cuid2::CuidConstructor;
use once_cell::sync::Lazy;
use tracing::debug;

use chatrelay_database::{MessageRepository, NewMessage};

use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{ConversationPayload, MessagePayload, Participant, ServerEvent};
use crate::rooms::{RoomKey, RoomRegistry};
use crate::session::{SessionHandle, SessionRegistry};

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

/// Delivery approach tag that requests server-side id assignment and
/// persistence with a confirmation echo.
const OPTIMISTIC_APPROACH: &str = "optimistic";

/// An inbound `send_message` payload before validation
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub conversation: Option<ConversationPayload>,
    pub sender: Participant,
    pub approach: Option<String>,
    pub content: String,
    pub id: Option<String>,
}

pub struct MessageRouter {
    messages: MessageRepository,
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
}

impl MessageRouter {
    pub fn new(
        messages: MessageRepository,
        sessions: Arc<SessionRegistry>,
        rooms: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            messages,
            sessions,
            rooms,
        }
    }

    /// Validate and dispatch one inbound message.
    ///
    /// Optimistic sends get a fresh message id, are persisted, and the
    /// finalized message is echoed back to the originating session only
    /// after persistence succeeds. Independent of approach, the
    /// message then fans out to every participant other than the sender via
    /// their private identity room, which reaches all of a recipient's
    /// sessions without any conversation-room subscription.
    pub async fn route(
        &self,
        session: &SessionHandle,
        incoming: IncomingMessage,
    ) -> RealtimeResult<()> {
        let conversation = incoming
            .conversation
            .ok_or_else(|| RealtimeError::validation("message is missing a conversation"))?;
        if conversation.users.is_empty() {
            return Err(RealtimeError::validation(
                "conversation has no participants",
            ));
        }

        let mut message = MessagePayload {
            id: incoming.id,
            conversation,
            sender: incoming.sender,
            approach: incoming.approach,
            content: incoming.content,
        };

        let optimistic = message
            .approach
            .as_deref()
            .is_some_and(|approach| approach.eq_ignore_ascii_case(OPTIMISTIC_APPROACH));

        if optimistic {
            let conversation_id = message
                .conversation
                .id
                .clone()
                .ok_or_else(|| RealtimeError::validation("conversation id is required"))?;

            let message_id = CUID.create_id();
            message.id = Some(message_id.clone());

            self.messages
                .create(&NewMessage {
                    public_id: message_id,
                    conversation_public_id: conversation_id.as_str().to_string(),
                    // Persist under the authenticated identity, not the
                    // client-asserted sender field.
                    sender_public_id: session.user_id().as_str().to_string(),
                    content: message.content.clone(),
                })
                .await?;

            // The write may have outlived the connection; only a still
            // registered session hears the confirmation.
            if self.sessions.is_registered(session.id()).await {
                session
                    .send(ServerEvent::MessageReceived {
                        message: message.clone(),
                    })
                    .await;
            }
        }

        let sender_id = message.sender.id.clone();
        for participant in &message.conversation.users {
            if participant.id == sender_id {
                continue;
            }
            self.rooms
                .broadcast(
                    &RoomKey::User(participant.id.clone()),
                    ServerEvent::MessageReceived {
                        message: message.clone(),
                    },
                    None,
                )
                .await;
        }

        debug!(
            session = %session.id(),
            message = message.id.as_deref().unwrap_or("<client-assigned>"),
            participants = message.conversation.users.len(),
            "message routed"
        );
        Ok(())
    }
}
