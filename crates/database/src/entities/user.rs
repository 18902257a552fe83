//! User entity definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// User entity representing a user in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub public_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub online_status: OnlineStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Request for creating a new user. The caller supplies an already-hashed
/// password; this crate never sees plaintext credentials.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
}

/// Online presence flag persisted per user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Offline,
}

impl OnlineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnlineStatus::Online => "online",
            OnlineStatus::Offline => "offline",
        }
    }
}

impl From<&str> for OnlineStatus {
    fn from(s: &str) -> Self {
        match s {
            "online" => OnlineStatus::Online,
            _ => OnlineStatus::Offline,
        }
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
