//! Realtime WebSocket connection handling.
//!
//! A connection is authenticated before the protocol upgrade; a client that
//! fails authentication is rejected and never reaches registration. After
//! the upgrade the session runs a setup sequence (register, join initial
//! rooms, announce presence) under the configured connect deadline; any
//! failure there tears the connection down, because a session that never
//! reached a consistent initialized state cannot safely continue. Once
//! initialized, every inbound event runs in its own task and failures are
//! contained: they surface as an `error` event to the originating session
//! and never cross into other sessions or the connection loop.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chatrelay_database::User;

use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{ClientEvent, ServerEvent, UserId};
use crate::rooms::join_initial_rooms;
use crate::router::IncomingMessage;
use crate::session::SessionHandle;
use crate::state::RealtimeState;

/// Outbound events queued per session before backpressure applies
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Realtime WebSocket connection handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RealtimeState>>,
    Query(query): Query<WebSocketQuery>,
) -> Result<Response, RealtimeError> {
    let user = authenticate(&state, query.token.as_deref()).await?;

    let max_payload = state.websocket.max_payload_bytes;
    Ok(ws
        .max_message_size(max_payload)
        .max_frame_size(max_payload)
        .on_upgrade(move |socket| handle_connection(socket, state, user)))
}

/// Resolve a raw connection's token to a bound user record, or fail before
/// registration is ever reached.
async fn authenticate(
    state: &RealtimeState,
    token: Option<&str>,
) -> Result<User, RealtimeError> {
    let token = token.ok_or(RealtimeError::Authentication(
        chatrelay_auth::AuthError::MissingToken,
    ))?;

    let auth_session = state.authenticator.validate_session(token).await?;

    state
        .users
        .find_by_id(auth_session.user_id)
        .await?
        .ok_or_else(|| RealtimeError::Setup("session user no longer exists".to_string()))
}

async fn handle_connection(socket: WebSocket, state: Arc<RealtimeState>, user: User) {
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let session = state
        .sessions
        .register(UserId(user.public_id.clone()), out_tx)
        .await;

    info!(session = %session.id(), user = %session.user_id(), "client connected");

    let connect_deadline = Duration::from_secs(state.websocket.connect_timeout_seconds);
    let setup = tokio::time::timeout(connect_deadline, initialize_session(&state, &session)).await;
    match setup {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(session = %session.id(), %error, "connection setup failed");
            terminate_session(&state, &session).await;
            return;
        }
        Err(_) => {
            warn!(session = %session.id(), "connection setup timed out");
            terminate_session(&state, &session).await;
            return;
        }
    }

    session
        .send(ServerEvent::Hello {
            user_id: session.user_id().clone(),
        })
        .await;

    let (sender, receiver) = socket.split();

    let ping_interval = Duration::from_secs(state.websocket.ping_interval_seconds);
    let send_task = tokio::spawn(forward_outbound(out_rx, sender, ping_interval));

    let idle_limit = ping_interval + Duration::from_secs(state.websocket.ping_timeout_seconds);
    receive_loop(receiver, &state, &session, idle_limit).await;

    send_task.abort();

    terminate_session(&state, &session).await;
    info!(session = %session.id(), user = %session.user_id(), "client disconnected");
}

/// Run the initial setup for a freshly registered session: subscribe it to
/// its rooms and announce the user online. Failures here are fatal to the
/// connection.
pub async fn initialize_session(
    state: &RealtimeState,
    session: &Arc<SessionHandle>,
) -> RealtimeResult<()> {
    join_initial_rooms(&state.rooms, &state.conversations, session)
        .await
        .map_err(|error| RealtimeError::Setup(format!("initial room join failed: {error}")))?;

    state
        .presence
        .set_online(session)
        .await
        .map_err(|error| RealtimeError::Setup(format!("presence announce failed: {error}")))?;

    Ok(())
}

/// Tear a session down. Safe to call any number of times; only the first
/// call for a live session deregisters, leaves rooms, and announces the
/// user offline.
pub async fn terminate_session(state: &RealtimeState, session: &Arc<SessionHandle>) {
    if !state.sessions.deregister(session.id()).await {
        return;
    }

    state.rooms.leave_all(session.id()).await;

    if let Err(error) = state.presence.set_offline(session).await {
        warn!(
            session = %session.id(),
            user = %session.user_id(),
            %error,
            "failed to announce offline presence"
        );
    }
}

/// Drain the session's outbound queue into the socket, interleaving
/// keep-alive pings on the configured cadence.
async fn forward_outbound(
    mut out_rx: mpsc::Receiver<ServerEvent>,
    mut sender: SplitSink<WebSocket, Message>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ping.tick().await;

    loop {
        tokio::select! {
            event = out_rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "failed to serialize outbound event");
                    }
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Process inbound frames until the connection closes or goes idle past the
/// keep-alive window.
async fn receive_loop(
    mut receiver: SplitStream<WebSocket>,
    state: &Arc<RealtimeState>,
    session: &Arc<SessionHandle>,
    idle_limit: Duration,
) {
    loop {
        let frame = match tokio::time::timeout(idle_limit, receiver.next()).await {
            Err(_) => {
                debug!(session = %session.id(), "connection idle past keep-alive window");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(error))) => {
                debug!(session = %session.id(), %error, "connection error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => dispatch_contained(state, session, &text).await,
            Message::Close(_) => break,
            // Ping/Pong frames count as liveness and need no handling here.
            _ => {}
        }
    }
}

/// Isolation boundary around one inbound event.
///
/// The handler runs in its own task; an `Err` return (or a panic, surfaced
/// as a join error) becomes an `error` event for the originating session
/// only. Nothing raised in here reaches the connection loop or another
/// session.
pub async fn dispatch_contained(
    state: &Arc<RealtimeState>,
    session: &Arc<SessionHandle>,
    text: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(error) => {
            debug!(session = %session.id(), %error, "malformed client event");
            session
                .send(ServerEvent::error("invalid event payload"))
                .await;
            return;
        }
    };

    let handler = tokio::spawn(handle_client_event(
        Arc::clone(state),
        Arc::clone(session),
        event,
    ));

    match handler.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(session = %session.id(), %error, "event handler failed");
            session.send(ServerEvent::error(error.client_message())).await;
        }
        Err(join_error) => {
            let error = RealtimeError::Unexpected(join_error.to_string());
            warn!(session = %session.id(), %error, "event handler aborted");
            session.send(ServerEvent::error(error.client_message())).await;
        }
    }
}

/// Dispatch one validated client event to the owning component.
async fn handle_client_event(
    state: Arc<RealtimeState>,
    session: Arc<SessionHandle>,
    event: ClientEvent,
) -> RealtimeResult<()> {
    match event {
        ClientEvent::Ping => {
            session.send(ServerEvent::Pong).await;
            Ok(())
        }
        ClientEvent::SendMessage {
            conversation,
            sender,
            approach,
            content,
            id,
        } => {
            state
                .message_router
                .route(
                    &session,
                    IncomingMessage {
                        conversation,
                        sender,
                        approach,
                        content,
                        id,
                    },
                )
                .await
        }
        ClientEvent::StartTyping { conversation_id } => {
            state.typing.relay(&session, conversation_id, true).await
        }
        ClientEvent::StopTyping { conversation_id } => {
            state.typing.relay(&session, conversation_id, false).await
        }
    }
}
