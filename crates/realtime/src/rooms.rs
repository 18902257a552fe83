//! Room registry: named broadcast groups over live sessions.
//!
//! A room is addressed by a tagged key: a user identity (the per-user
//! private channel) or a conversation identity (the group channel typing
//! indicators use). Membership is session-scoped and vanishes with the
//! session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use chatrelay_database::{ConversationRepository, StorageResult};

use crate::events::{ConversationId, ServerEvent, UserId};
use crate::session::{SessionHandle, SessionId, SessionRegistry};

/// Broadcast-group address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    User(UserId),
    Conversation(ConversationId),
}

/// Registry from room key to the set of member sessions
pub struct RoomRegistry {
    sessions: Arc<SessionRegistry>,
    rooms: RwLock<HashMap<RoomKey, HashSet<SessionId>>>,
}

impl RoomRegistry {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            sessions,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a session to a room. Joining a room twice is a no-op.
    pub async fn join(&self, key: RoomKey, session: SessionId) {
        self.rooms
            .write()
            .await
            .entry(key)
            .or_default()
            .insert(session);
    }

    /// Remove a session from one room. Empty rooms are dropped.
    pub async fn leave(&self, key: &RoomKey, session: SessionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(key) {
            members.remove(&session);
            if members.is_empty() {
                rooms.remove(key);
            }
        }
    }

    /// Remove a session from every room it joined.
    pub async fn leave_all(&self, session: SessionId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&session);
            !members.is_empty()
        });
    }

    /// Number of sessions currently subscribed to a room.
    pub async fn member_count(&self, key: &RoomKey) -> usize {
        self.rooms
            .read()
            .await
            .get(key)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Deliver an event to every member of a room, optionally excluding one
    /// session (the originator). Returns the number of sessions reached.
    pub async fn broadcast(
        &self,
        key: &RoomKey,
        event: ServerEvent,
        except: Option<SessionId>,
    ) -> usize {
        let members: Vec<SessionId> = {
            let rooms = self.rooms.read().await;
            match rooms.get(key) {
                Some(members) => members.iter().copied().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for member in members {
            if Some(member) == except {
                continue;
            }
            // Membership can outlive a session briefly on teardown; skip
            // entries whose session is gone.
            if let Some(handle) = self.sessions.get(member).await {
                handle.send(event.clone()).await;
                delivered += 1;
            }
        }
        delivered
    }
}

/// Room join coordinator: subscribe a freshly registered session to the
/// rooms it must hear broadcasts on, namely its own identity room (held for
/// the lifetime of the connection; all private delivery is addressed there)
/// and each conversation it participates in.
pub async fn join_initial_rooms(
    rooms: &RoomRegistry,
    conversations: &ConversationRepository,
    session: &SessionHandle,
) -> StorageResult<()> {
    rooms
        .join(RoomKey::User(session.user_id().clone()), session.id())
        .await;

    for conversation_id in conversations
        .list_ids_for_user(session.user_id().as_str())
        .await?
    {
        rooms
            .join(
                RoomKey::Conversation(ConversationId(conversation_id)),
                session.id(),
            )
            .await;
    }

    debug!(session = %session.id(), user = %session.user_id(), "initial rooms joined");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn test_session(
        registry: &SessionRegistry,
        user: &str,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = registry.register(UserId::from(user), tx).await;
        (handle, rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_members_and_honours_exclusion() {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = RoomRegistry::new(Arc::clone(&sessions));

        let (alice, mut alice_rx) = test_session(&sessions, "alice").await;
        let (bob, mut bob_rx) = test_session(&sessions, "bob").await;

        let key = RoomKey::Conversation(ConversationId::from("c1"));
        rooms.join(key.clone(), alice.id()).await;
        rooms.join(key.clone(), bob.id()).await;

        let delivered = rooms
            .broadcast(&key, ServerEvent::Pong, Some(alice.id()))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(bob_rx.recv().await, Some(ServerEvent::Pong));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_room_reaches_nobody() {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = RoomRegistry::new(sessions);

        let delivered = rooms
            .broadcast(
                &RoomKey::User(UserId::from("ghost")),
                ServerEvent::Pong,
                None,
            )
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn leave_all_removes_membership_everywhere() {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = RoomRegistry::new(Arc::clone(&sessions));

        let (alice, _alice_rx) = test_session(&sessions, "alice").await;

        let user_room = RoomKey::User(UserId::from("alice"));
        let convo_room = RoomKey::Conversation(ConversationId::from("c1"));
        rooms.join(user_room.clone(), alice.id()).await;
        rooms.join(convo_room.clone(), alice.id()).await;

        rooms.leave_all(alice.id()).await;

        assert_eq!(rooms.member_count(&user_room).await, 0);
        assert_eq!(rooms.member_count(&convo_room).await, 0);
    }

    #[tokio::test]
    async fn deregistered_sessions_are_skipped_on_broadcast() {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = RoomRegistry::new(Arc::clone(&sessions));

        let (alice, _alice_rx) = test_session(&sessions, "alice").await;
        let key = RoomKey::User(UserId::from("alice"));
        rooms.join(key.clone(), alice.id()).await;

        sessions.deregister(alice.id()).await;

        let delivered = rooms.broadcast(&key, ServerEvent::Pong, None).await;
        assert_eq!(delivered, 0);
    }
}
