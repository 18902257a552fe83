//! Message entity definitions

use serde::{Deserialize, Serialize};

/// A chat message as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub public_id: String,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub created_at: String,
}

/// Request for persisting a new message. Identifiers are the public ids
/// used on the wire; the repository resolves them to row ids.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub public_id: String,
    pub conversation_public_id: String,
    pub sender_public_id: String,
    pub content: String,
}
