//! Entity definitions for the chatrelay storage layer

pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::Conversation;
pub use message::{NewMessage, StoredMessage};
pub use user::{NewUser, OnlineStatus, User};
