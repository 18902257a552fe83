//! Conversation entity definitions

use serde::{Deserialize, Serialize};

/// A conversation between two or more users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub public_id: String,
    pub created_at: String,
}
