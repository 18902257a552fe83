//! # Chatrelay Database Crate
//!
//! Storage collaborator for the chatrelay backend: connection management,
//! migrations, and repository implementations over sqlite.

use sqlx::SqlitePool;

use chatrelay_config::DatabaseConfig;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::prepare_database;
pub use migrations::run_migrations;

// Re-export repositories
pub use repos::{ConversationRepository, MessageRepository, UserRepository};

// Re-export entities
pub use entities::{
    conversation::Conversation,
    message::{NewMessage, StoredMessage},
    user::{NewUser, OnlineStatus, User},
};

// Re-export types
pub use types::{StorageError, StorageResult};

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> StorageResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    run_migrations(&pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    Ok(pool)
}
