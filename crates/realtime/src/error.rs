//! Error types for the realtime layer.
//!
//! The taxonomy mirrors how failures are allowed to travel: setup and
//! authentication failures terminate the connection, everything else is
//! contained and reported to the originating session only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use chatrelay_auth::AuthError;
use chatrelay_database::StorageError;

/// Realtime error types
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Authentication, initial room join, or initial presence write failed.
    /// The connection never reaches (or cannot stay in) a consistent
    /// initialized state and is torn down.
    #[error("connection setup failed: {0}")]
    Setup(String),

    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Malformed event payload. Reported to the sender, no state touched.
    #[error("{0}")]
    Validation(String),

    /// The storage collaborator failed mid-operation. Reported to the
    /// sender; side effects already performed are not rolled back.
    #[error("storage failure: {0}")]
    Persistence(#[from] StorageError),

    /// Anything else raised inside an event handler.
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl RealtimeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for failures that terminate the connection instead of being
    /// reported as an `error` event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup(_) | Self::Authentication(_))
    }

    /// Human-readable message delivered to the originating session.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Persistence(_) => "storage operation failed".to_string(),
            Self::Setup(_) | Self::Authentication(_) => "connection setup failed".to_string(),
            Self::Unexpected(_) => "internal error".to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Setup(_) | Self::Persistence(_) | Self::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": status.as_str(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;
