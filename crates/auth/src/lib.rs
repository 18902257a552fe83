//! Authentication collaborator for the chatrelay backend.
//!
//! Issues opaque session tokens on login and validates them when a client
//! opens a realtime connection. The realtime core never sees credentials;
//! it hands a raw token to [`Authenticator::validate_session`] and receives
//! the bound user identity or a failure.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use chatrelay_config::AuthConfig;
use chatrelay_database::{NewUser, StorageError, User, UserRepository};

#[derive(Clone)]
pub struct Authenticator {
    pool: SqlitePool,
    users: UserRepository,
    session_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user already exists")]
    UserExists,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing session token")]
    MissingToken,
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] argon2::password_hash::Error),
}

/// A validated session binding a token to a user row
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, config: AuthConfig) -> Self {
        let session_ttl = Duration::seconds(config.session_ttl_seconds as i64);
        let users = UserRepository::new(pool.clone());

        Self {
            pool,
            users,
            session_ttl,
        }
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    /// Register a new user with a hashed password
    pub async fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        if self.users.find_by_username(username).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        let user = self
            .users
            .create(&NewUser {
                username: username.to_string(),
                password_hash,
            })
            .await?;

        debug!(user = %user.public_id, "registered user");
        Ok(user)
    }

    /// Verify credentials and mint a session token
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&user.password_hash)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let token = generate_token();
        let now = Utc::now();
        let expires_at = now + self.session_ttl;

        sqlx::query(
            "INSERT INTO auth_sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(user.id)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(AuthSession {
            token,
            user_id: user.id,
            expires_at,
        })
    }

    /// Validate a session token, returning the bound session or failing.
    ///
    /// Expired sessions are removed as they are discovered.
    pub async fn validate_session(&self, token: &str) -> Result<AuthSession, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let row = sqlx::query("SELECT token, user_id, expires_at FROM auth_sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let expires_at: String = row.get("expires_at");
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|_| AuthError::SessionNotFound)?
            .with_timezone(&Utc);

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM auth_sessions WHERE token = ?")
                .bind(token)
                .execute(&self.pool)
                .await?;
            return Err(AuthError::SessionExpired);
        }

        Ok(AuthSession {
            token: row.get("token"),
            user_id: row.get("user_id"),
            expires_at,
        })
    }

    /// Revoke a session token. Revoking an unknown token is a no-op.
    pub async fn revoke_session(&self, token: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM auth_sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
