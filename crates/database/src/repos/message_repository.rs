//! Message repository for database operations.

use crate::entities::{NewMessage, StoredMessage};
use crate::types::{StorageError, StorageResult};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

/// Repository for message database operations
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    /// Create a new message repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message. The public id is assigned by the caller (the
    /// routing layer generates it for optimistic sends).
    pub async fn create(&self, request: &NewMessage) -> StorageResult<StoredMessage> {
        let conversation = sqlx::query("SELECT id FROM conversations WHERE public_id = ?")
            .bind(&request.conversation_public_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                StorageError::not_found("conversation", &request.conversation_public_id)
            })?;
        let conversation_id: i64 = conversation.get("id");

        let sender = sqlx::query("SELECT id FROM users WHERE public_id = ?")
            .bind(&request.sender_public_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("user", &request.sender_public_id))?;
        let sender_id: i64 = sender.get("id");

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO messages (public_id, conversation_id, sender_id, content, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&request.public_id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(&request.content)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(StoredMessage {
            id: result.last_insert_rowid(),
            public_id: request.public_id.clone(),
            conversation_id,
            sender_id,
            content: request.content.clone(),
            created_at: now,
        })
    }

    /// Find a message by public ID
    pub async fn find_by_public_id(&self, public_id: &str) -> StorageResult<Option<StoredMessage>> {
        let row = sqlx::query(
            "SELECT id, public_id, conversation_id, sender_id, content, created_at \
             FROM messages WHERE public_id = ?",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredMessage {
            id: row.get("id"),
            public_id: row.get("public_id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }))
    }
}
