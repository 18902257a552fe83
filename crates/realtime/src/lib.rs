//! # Chatrelay Realtime Crate
//!
//! The realtime transport layer: it accepts persistent WebSocket
//! connections, authenticates them, tracks online presence, relays chat
//! messages between conversation participants, and propagates ephemeral
//! typing indicators.
//!
//! ## Architecture
//!
//! - **Sessions**: one registered session per physical connection, bound to
//!   an authenticated user identity
//! - **Rooms**: named broadcast groups (per-user identity channels and
//!   per-conversation channels) over live sessions
//! - **Presence**: reference-counted online/offline transitions, persisted
//!   and announced to friends
//! - **Routing**: message validation, optimistic persistence with
//!   confirmation, per-recipient fan-out
//! - **Containment**: per-event isolation; one failing handler costs
//!   neither the session nor its neighbours

pub mod error;
pub mod events;
pub mod middleware;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod session;
pub mod state;
pub mod typing;
pub mod websocket;

// Re-export main types for convenience
pub use error::{RealtimeError, RealtimeResult};
pub use events::{ClientEvent, ConversationId, ServerEvent, UserId};
pub use state::RealtimeState;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;

/// Create the realtime application router
pub fn create_router(state: RealtimeState) -> Router {
    let cors = middleware::cors_layer(&state.websocket);

    let mut path = state.websocket.path.clone();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let arc_state = Arc::new(state);

    Router::new()
        .route(&path, get(websocket::websocket_handler))
        .with_state(arc_state)
        .layer(cors)
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}
