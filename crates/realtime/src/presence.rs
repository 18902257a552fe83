//! Presence service: persists online/offline transitions and notifies the
//! user's friends.
//!
//! Sessions are reference-counted per user, so a user with several live
//! sessions (multi-device) stays online until the last one ends, and each
//! transition is persisted and announced exactly once. Transitions for all
//! users are serialized behind one async mutex; a handler holds it across
//! the persist-then-broadcast sequence, which keeps concurrent connects and
//! disconnects of the same user from interleaving.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use chatrelay_database::{OnlineStatus, StorageResult, UserRepository};

use crate::events::{ServerEvent, UserId};
use crate::rooms::{RoomKey, RoomRegistry};
use crate::session::SessionHandle;

pub struct PresenceService {
    users: UserRepository,
    rooms: Arc<RoomRegistry>,
    live_sessions: Mutex<HashMap<UserId, usize>>,
}

impl PresenceService {
    pub fn new(users: UserRepository, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            users,
            rooms,
            live_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Count a session towards its user's presence. On the user's first
    /// live session the online flag is persisted and every friend's
    /// identity room hears `presence_changed`.
    ///
    /// A persistence failure undoes the count and propagates; the caller
    /// treats it as a setup failure.
    pub async fn set_online(&self, session: &SessionHandle) -> StorageResult<()> {
        let user = session.user_id().clone();
        let mut live = self.live_sessions.lock().await;

        let count = live.entry(user.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            debug!(user = %user, sessions = *count, "additional session, user already online");
            return Ok(());
        }

        if let Err(error) = self
            .users
            .set_online_status(user.as_str(), OnlineStatus::Online)
            .await
        {
            live.remove(&user);
            return Err(error);
        }

        self.announce(&user, OnlineStatus::Online).await?;
        Ok(())
    }

    /// Release a session's count. On the user's last live session the
    /// offline flag is persisted and friends are notified. Releasing a
    /// user with no counted sessions is a no-op, so duplicate disconnect
    /// delivery never double-announces.
    pub async fn set_offline(&self, session: &SessionHandle) -> StorageResult<()> {
        let user = session.user_id().clone();
        let mut live = self.live_sessions.lock().await;

        let Some(count) = live.get_mut(&user) else {
            return Ok(());
        };

        *count -= 1;
        if *count > 0 {
            debug!(user = %user, sessions = *count, "session ended, user still online elsewhere");
            return Ok(());
        }
        live.remove(&user);

        self.users
            .set_online_status(user.as_str(), OnlineStatus::Offline)
            .await?;

        self.announce(&user, OnlineStatus::Offline).await?;
        Ok(())
    }

    /// Number of live sessions counted for a user.
    pub async fn session_count(&self, user: &UserId) -> usize {
        self.live_sessions
            .lock()
            .await
            .get(user)
            .copied()
            .unwrap_or(0)
    }

    async fn announce(&self, user: &UserId, status: OnlineStatus) -> StorageResult<()> {
        let friends = self.users.list_friend_ids(user.as_str()).await?;

        for friend in friends {
            self.rooms
                .broadcast(
                    &RoomKey::User(UserId(friend)),
                    ServerEvent::PresenceChanged {
                        user_id: user.clone(),
                        status,
                    },
                    None,
                )
                .await;
        }

        debug!(user = %user, status = %status, "presence change announced");
        Ok(())
    }
}
