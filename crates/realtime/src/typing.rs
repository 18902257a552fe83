//! Typing indicator relay: ephemeral start/stop signals for a conversation
//! room. Nothing here is persisted or retried.

use std::sync::Arc;

use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{ConversationId, ServerEvent};
use crate::rooms::{RoomKey, RoomRegistry};
use crate::session::SessionHandle;

pub struct TypingRelay {
    rooms: Arc<RoomRegistry>,
}

impl TypingRelay {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// Forward a typing signal to the conversation room, excluding the
    /// originating session. An empty conversation identity is rejected
    /// without broadcasting.
    pub async fn relay(
        &self,
        session: &SessionHandle,
        conversation_id: ConversationId,
        typing: bool,
    ) -> RealtimeResult<()> {
        if conversation_id.as_str().is_empty() {
            return Err(RealtimeError::validation("missing conversation id"));
        }

        let key = RoomKey::Conversation(conversation_id.clone());
        // Conversations created after connect were not joined at setup;
        // joining on first use keeps the sender subscribed from here on.
        self.rooms.join(key.clone(), session.id()).await;

        self.rooms
            .broadcast(
                &key,
                ServerEvent::typing(conversation_id, typing),
                Some(session.id()),
            )
            .await;
        Ok(())
    }
}
