//! Session registry: bookkeeping for live authenticated connections.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::events::{ServerEvent, UserId};

/// Transient identifier of one physical connection
pub type SessionId = Uuid;

/// Handle to one live authenticated connection.
///
/// The user identity is immutable for the lifetime of the session and is
/// supplied by the authentication collaborator, never by client payloads.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    user_id: UserId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Queue an event for delivery to this session's socket.
    ///
    /// Sending to a session whose connection already closed is dropped
    /// silently; a receiver going away must never fail the sender's handler.
    pub async fn send(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!(session = %self.id, "dropping event for closed session");
        }
    }
}

/// Registry of live sessions, keyed by connection identifier
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new session to an authenticated user identity. Each call
    /// produces a fresh connection identifier; no two live sessions share
    /// one.
    pub async fn register(
        &self,
        user_id: UserId,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle {
            id: Uuid::new_v4(),
            user_id,
            outbound,
        });

        self.sessions
            .write()
            .await
            .insert(handle.id, Arc::clone(&handle));
        debug!(session = %handle.id, user = %handle.user_id, "session registered");
        handle
    }

    /// Remove a session. Idempotent: removing an unknown or already-removed
    /// session is a no-op and returns `false`.
    pub async fn deregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            debug!(session = %id, "session deregistered");
        }
        removed
    }

    /// Whether a session is still live. Completions of in-flight work check
    /// this before emitting to the session.
    pub async fn is_registered(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_assigns_unique_connection_ids() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);

        let first = registry.register(UserId::from("a"), tx.clone()).await;
        let second = registry.register(UserId::from("a"), tx).await;

        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);

        let session = registry.register(UserId::from("a"), tx).await;

        assert!(registry.deregister(session.id()).await);
        assert!(!registry.deregister(session.id()).await);
        assert!(!registry.is_registered(session.id()).await);
    }

    #[tokio::test]
    async fn send_to_closed_session_is_dropped() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        let session = registry.register(UserId::from("a"), tx).await;

        drop(rx);
        // Must not error or panic.
        session.send(ServerEvent::Pong).await;
    }
}
