//! Conversation repository for database operations.

use crate::entities::Conversation;
use crate::types::{StorageError, StorageResult};
use chrono::Utc;
use cuid2::CuidConstructor;
use once_cell::sync::Lazy;
use sqlx::{Row, SqlitePool};

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

/// Repository for conversation database operations
#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    /// Create a new conversation repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a conversation with the given participants (public ids)
    pub async fn create(&self, participant_public_ids: &[&str]) -> StorageResult<Conversation> {
        let public_id = CUID.create_id();
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query("INSERT INTO conversations (public_id, created_at) VALUES (?, ?)")
            .bind(&public_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        let conversation_id = result.last_insert_rowid();

        for participant in participant_public_ids {
            let row = sqlx::query("SELECT id FROM users WHERE public_id = ?")
                .bind(participant)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StorageError::not_found("user", *participant))?;
            let user_id: i64 = row.get("id");

            sqlx::query(
                "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, joined_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(user_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }

        Ok(Conversation {
            id: conversation_id,
            public_id,
            created_at: now,
        })
    }

    /// List the public ids of every conversation a user participates in
    pub async fn list_ids_for_user(&self, user_public_id: &str) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT c.public_id FROM conversations c \
             JOIN conversation_members m ON m.conversation_id = c.id \
             JOIN users u ON u.id = m.user_id \
             WHERE u.public_id = ? \
             ORDER BY c.created_at ASC",
        )
        .bind(user_public_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("public_id")).collect())
    }

    /// List the participant public ids of a conversation
    pub async fn participant_ids(&self, conversation_public_id: &str) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT u.public_id FROM users u \
             JOIN conversation_members m ON m.user_id = u.id \
             JOIN conversations c ON c.id = m.conversation_id \
             WHERE c.public_id = ?",
        )
        .bind(conversation_public_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("public_id")).collect())
    }
}
