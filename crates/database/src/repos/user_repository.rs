//! User repository for database operations.

use crate::entities::{NewUser, OnlineStatus, User};
use crate::types::{StorageError, StorageResult};
use chrono::Utc;
use cuid2::CuidConstructor;
use once_cell::sync::Lazy;
use sqlx::{Row, SqlitePool};

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

/// Repository for user database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user record
    pub async fn create(&self, request: &NewUser) -> StorageResult<User> {
        let public_id = CUID.create_id();
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO users (public_id, username, password_hash, online_status, created_at, updated_at) \
             VALUES (?, ?, ?, 'offline', ?, ?)",
        )
        .bind(&public_id)
        .bind(&request.username)
        .bind(&request.password_hash)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            public_id,
            username: request.username.clone(),
            password_hash: request.password_hash.clone(),
            online_status: OnlineStatus::Offline,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Find user by public ID
    pub async fn find_by_public_id(&self, public_id: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, public_id, username, password_hash, online_status, created_at, updated_at \
             FROM users WHERE public_id = ?",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::row_to_user))
    }

    /// Find user by username
    pub async fn find_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, public_id, username, password_hash, online_status, created_at, updated_at \
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::row_to_user))
    }

    /// Find user by row ID
    pub async fn find_by_id(&self, id: i64) -> StorageResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, public_id, username, password_hash, online_status, created_at, updated_at \
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::row_to_user))
    }

    /// Persist a user's online status flag
    pub async fn set_online_status(
        &self,
        public_id: &str,
        status: OnlineStatus,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE users SET online_status = ?, updated_at = ? WHERE public_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(public_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("user", public_id));
        }
        Ok(())
    }

    /// List the public ids of a user's friends
    pub async fn list_friend_ids(&self, public_id: &str) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT u.public_id FROM friendships f \
             JOIN users me ON me.id = f.user_id \
             JOIN users u ON u.id = f.friend_id \
             WHERE me.public_id = ?",
        )
        .bind(public_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("public_id")).collect())
    }

    /// Record a mutual friendship between two users
    pub async fn add_friendship(&self, a_public_id: &str, b_public_id: &str) -> StorageResult<()> {
        let a = self
            .find_by_public_id(a_public_id)
            .await?
            .ok_or_else(|| StorageError::not_found("user", a_public_id))?;
        let b = self
            .find_by_public_id(b_public_id)
            .await?
            .ok_or_else(|| StorageError::not_found("user", b_public_id))?;

        let now = Utc::now().to_rfc3339();
        // Friendship is symmetric; store both directions.
        sqlx::query(
            "INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at) VALUES (?, ?, ?), (?, ?, ?)",
        )
        .bind(a.id)
        .bind(b.id)
        .bind(&now)
        .bind(b.id)
        .bind(a.id)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_user(row: sqlx::sqlite::SqliteRow) -> User {
        User {
            id: row.get("id"),
            public_id: row.get("public_id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            online_status: OnlineStatus::from(row.get::<String, _>("online_status").as_str()),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}
