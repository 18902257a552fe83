//! Shared application state for the realtime layer

use std::sync::Arc;

use sqlx::SqlitePool;

use chatrelay_auth::Authenticator;
use chatrelay_config::WebSocketConfig;
use chatrelay_database::{ConversationRepository, MessageRepository, UserRepository};

use crate::presence::PresenceService;
use crate::rooms::RoomRegistry;
use crate::router::MessageRouter;
use crate::session::SessionRegistry;
use crate::typing::TypingRelay;

/// Shared state wiring the realtime services together
#[derive(Clone)]
pub struct RealtimeState {
    /// Database connection pool
    pub pool: SqlitePool,
    /// Connection-level WebSocket options
    pub websocket: WebSocketConfig,
    /// Authentication collaborator
    pub authenticator: Authenticator,
    /// User storage
    pub users: UserRepository,
    /// Conversation storage (initial room joins)
    pub conversations: ConversationRepository,
    /// Live session bookkeeping
    pub sessions: Arc<SessionRegistry>,
    /// Broadcast-group membership
    pub rooms: Arc<RoomRegistry>,
    /// Online/offline transitions
    pub presence: Arc<PresenceService>,
    /// Inbound message dispatch
    pub message_router: Arc<MessageRouter>,
    /// Ephemeral typing signals
    pub typing: Arc<TypingRelay>,
}

impl RealtimeState {
    /// Create realtime state with all services initialized
    pub fn new(pool: SqlitePool, authenticator: Authenticator, websocket: WebSocketConfig) -> Self {
        let users = UserRepository::new(pool.clone());
        let conversations = ConversationRepository::new(pool.clone());
        let messages = MessageRepository::new(pool.clone());

        let sessions = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new(Arc::clone(&sessions)));
        let presence = Arc::new(PresenceService::new(users.clone(), Arc::clone(&rooms)));
        let message_router = Arc::new(MessageRouter::new(
            messages,
            Arc::clone(&sessions),
            Arc::clone(&rooms),
        ));
        let typing = Arc::new(TypingRelay::new(Arc::clone(&rooms)));

        Self {
            pool,
            websocket,
            authenticator,
            users,
            conversations,
            sessions,
            rooms,
            presence,
            message_router,
            typing,
        }
    }
}
