//! End-to-end tests for the realtime layer: session lifecycle, presence
//! announcements, message routing, typing relay, and error containment,
//! driven over a real sqlite database.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use chatrelay_auth::Authenticator;
use chatrelay_config::{AuthConfig, DatabaseConfig, WebSocketConfig};
use chatrelay_database::{
    initialize_database, MessageRepository, NewUser, OnlineStatus, UserRepository,
};
use chatrelay_realtime::error::RealtimeError;
use chatrelay_realtime::events::{
    ConversationId, ConversationPayload, Participant, ServerEvent, UserId,
};
use chatrelay_realtime::router::IncomingMessage;
use chatrelay_realtime::session::SessionHandle;
use chatrelay_realtime::websocket::{dispatch_contained, initialize_session, terminate_session};
use chatrelay_realtime::RealtimeState;

struct TestBackend {
    state: Arc<RealtimeState>,
    _temp_dir: TempDir,
}

impl TestBackend {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("realtime.db");

        let pool = initialize_database(&DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 5,
        })
        .await
        .unwrap();

        let authenticator = Authenticator::new(
            pool.clone(),
            AuthConfig {
                session_ttl_seconds: 3_600,
            },
        );
        let state = RealtimeState::new(pool, authenticator, WebSocketConfig::default());

        Self {
            state: Arc::new(state),
            _temp_dir: temp_dir,
        }
    }

    fn users(&self) -> &UserRepository {
        &self.state.users
    }

    fn messages(&self) -> MessageRepository {
        MessageRepository::new(self.state.pool.clone())
    }

    async fn create_user(&self, username: &str) -> String {
        self.users()
            .create(&NewUser {
                username: username.to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap()
            .public_id
    }

    /// Register a session and run the real connection setup sequence.
    async fn connect(&self, public_id: &str) -> (Arc<SessionHandle>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let session = self
            .state
            .sessions
            .register(UserId::from(public_id), tx)
            .await;
        initialize_session(&self.state, &session)
            .await
            .unwrap();
        (session, rx)
    }

    async fn disconnect(&self, session: &Arc<SessionHandle>) {
        terminate_session(&self.state, session).await;
    }
}

async fn recv(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn assert_silent(rx: &mut mpsc::Receiver<ServerEvent>) {
    if let Ok(event) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

fn incoming_message(
    conversation_id: Option<&str>,
    participants: &[&str],
    sender: &str,
    approach: Option<&str>,
    content: &str,
) -> IncomingMessage {
    IncomingMessage {
        conversation: Some(ConversationPayload {
            id: conversation_id.map(ConversationId::from),
            users: participants
                .iter()
                .map(|id| Participant {
                    id: UserId::from(*id),
                })
                .collect(),
        }),
        sender: Participant {
            id: UserId::from(sender),
        },
        approach: approach.map(str::to_string),
        content: content.to_string(),
        id: None,
    }
}

#[tokio::test]
async fn full_scenario_presence_message_and_disconnect() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;
    backend.users().add_friendship(&alice, &bob).await.unwrap();

    let convo = backend
        .state
        .conversations
        .create(&[&alice, &bob])
        .await
        .unwrap();

    // Bob connects first and hears nothing yet.
    let (bob_session, mut bob_rx) = backend.connect(&bob).await;

    // Alice connecting announces her online to Bob's identity room.
    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    assert_eq!(
        recv(&mut bob_rx).await,
        ServerEvent::PresenceChanged {
            user_id: UserId(alice.clone()),
            status: OnlineStatus::Online,
        }
    );
    let stored_alice = backend
        .users()
        .find_by_public_id(&alice)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_alice.online_status, OnlineStatus::Online);

    // Alice sends an optimistic "hi".
    backend
        .state
        .message_router
        .route(
            &alice_session,
            incoming_message(
                Some(&convo.public_id),
                &[&alice, &bob],
                &alice,
                Some("optimistic"),
                "hi",
            ),
        )
        .await
        .unwrap();

    // Alice gets exactly one confirmation carrying the generated id.
    let confirmation = recv(&mut alice_rx).await;
    let ServerEvent::MessageReceived { message } = confirmation else {
        panic!("expected message confirmation, got {confirmation:?}");
    };
    let message_id = message.id.clone().expect("confirmation must carry an id");
    assert!(!message_id.is_empty());
    assert_eq!(message.content, "hi");
    assert_silent(&mut alice_rx).await;

    // Bob gets the same message exactly once.
    let delivery = recv(&mut bob_rx).await;
    let ServerEvent::MessageReceived { message } = delivery else {
        panic!("expected message delivery, got {delivery:?}");
    };
    assert_eq!(message.id.as_deref(), Some(message_id.as_str()));
    assert_eq!(message.content, "hi");
    assert_silent(&mut bob_rx).await;

    // The confirmed id is the persisted id.
    let stored = backend
        .messages()
        .find_by_public_id(&message_id)
        .await
        .unwrap()
        .expect("optimistic message must be persisted");
    assert_eq!(stored.content, "hi");

    // Alice disconnecting announces offline to Bob exactly once.
    backend.disconnect(&alice_session).await;
    assert_eq!(
        recv(&mut bob_rx).await,
        ServerEvent::PresenceChanged {
            user_id: UserId(alice.clone()),
            status: OnlineStatus::Offline,
        }
    );
    assert_silent(&mut bob_rx).await;

    // Duplicate disconnect is a no-op.
    backend.disconnect(&alice_session).await;
    assert_silent(&mut bob_rx).await;

    let stored_alice = backend
        .users()
        .find_by_public_id(&alice)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_alice.online_status, OnlineStatus::Offline);

    backend.disconnect(&bob_session).await;
}

#[tokio::test]
async fn fan_out_reaches_every_participant_except_the_sender() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;
    let carol = backend.create_user("carol").await;

    let convo = backend
        .state
        .conversations
        .create(&[&alice, &bob, &carol])
        .await
        .unwrap();

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    let (_bob_session, mut bob_rx) = backend.connect(&bob).await;
    let (_carol_session, mut carol_rx) = backend.connect(&carol).await;

    backend
        .state
        .message_router
        .route(
            &alice_session,
            incoming_message(
                Some(&convo.public_id),
                &[&alice, &bob, &carol],
                &alice,
                Some("optimistic"),
                "hello all",
            ),
        )
        .await
        .unwrap();

    // N participants, N-1 deliveries plus one confirmation to the sender.
    assert!(matches!(
        recv(&mut alice_rx).await,
        ServerEvent::MessageReceived { .. }
    ));
    assert_silent(&mut alice_rx).await;

    assert!(matches!(
        recv(&mut bob_rx).await,
        ServerEvent::MessageReceived { .. }
    ));
    assert_silent(&mut bob_rx).await;

    assert!(matches!(
        recv(&mut carol_rx).await,
        ServerEvent::MessageReceived { .. }
    ));
    assert_silent(&mut carol_rx).await;
}

#[tokio::test]
async fn non_optimistic_messages_fan_out_without_persistence_or_confirmation() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;
    let convo = backend
        .state
        .conversations
        .create(&[&alice, &bob])
        .await
        .unwrap();

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    let (_bob_session, mut bob_rx) = backend.connect(&bob).await;

    let mut incoming = incoming_message(
        Some(&convo.public_id),
        &[&alice, &bob],
        &alice,
        None,
        "pre-identified",
    );
    incoming.id = Some("client-1".to_string());

    backend
        .state
        .message_router
        .route(&alice_session, incoming)
        .await
        .unwrap();

    // No confirmation for the sender, one delivery for the recipient.
    assert_silent(&mut alice_rx).await;
    let delivery = recv(&mut bob_rx).await;
    let ServerEvent::MessageReceived { message } = delivery else {
        panic!("expected message delivery, got {delivery:?}");
    };
    assert_eq!(message.id.as_deref(), Some("client-1"));

    // Nothing was written to storage.
    assert!(backend
        .messages()
        .find_by_public_id("client-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn approach_tag_is_case_insensitive() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let convo = backend.state.conversations.create(&[&alice]).await.unwrap();

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;

    backend
        .state
        .message_router
        .route(
            &alice_session,
            incoming_message(
                Some(&convo.public_id),
                &[&alice],
                &alice,
                Some("OPTIMISTIC"),
                "shout",
            ),
        )
        .await
        .unwrap();

    let confirmation = recv(&mut alice_rx).await;
    let ServerEvent::MessageReceived { message } = confirmation else {
        panic!("expected confirmation, got {confirmation:?}");
    };
    assert!(message.id.is_some());
}

#[tokio::test]
async fn invalid_messages_reach_only_the_sender_as_errors() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;
    backend
        .state
        .conversations
        .create(&[&alice, &bob])
        .await
        .unwrap();

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    let (_bob_session, mut bob_rx) = backend.connect(&bob).await;

    // Missing conversation object.
    let frame = serde_json::json!({
        "type": "send_message",
        "sender": {"id": alice},
        "content": "hi"
    })
    .to_string();
    dispatch_contained(&backend.state, &alice_session, &frame).await;

    assert_eq!(
        recv(&mut alice_rx).await,
        ServerEvent::error("message is missing a conversation")
    );
    assert_silent(&mut bob_rx).await;

    // Empty participant set.
    let frame = serde_json::json!({
        "type": "send_message",
        "conversation": {"users": []},
        "sender": {"id": alice},
        "content": "hi"
    })
    .to_string();
    dispatch_contained(&backend.state, &alice_session, &frame).await;

    assert_eq!(
        recv(&mut alice_rx).await,
        ServerEvent::error("conversation has no participants")
    );
    assert_silent(&mut alice_rx).await;
    assert_silent(&mut bob_rx).await;
}

#[tokio::test]
async fn malformed_frames_are_reported_to_the_sender() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let (alice_session, mut alice_rx) = backend.connect(&alice).await;

    dispatch_contained(&backend.state, &alice_session, "not json at all").await;

    assert_eq!(
        recv(&mut alice_rx).await,
        ServerEvent::error("invalid event payload")
    );
    assert_silent(&mut alice_rx).await;
}

#[tokio::test]
async fn persistence_failure_sends_no_confirmation_and_no_fan_out() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    let (_bob_session, mut bob_rx) = backend.connect(&bob).await;

    // The conversation id does not exist in storage, so the optimistic
    // persist fails after validation passed.
    let error = backend
        .state
        .message_router
        .route(
            &alice_session,
            incoming_message(
                Some("no-such-conversation"),
                &[&alice, &bob],
                &alice,
                Some("optimistic"),
                "hi",
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, RealtimeError::Persistence(_)));

    assert_silent(&mut alice_rx).await;
    assert_silent(&mut bob_rx).await;

    // Driven through the containment wrapper, the failure surfaces as an
    // error event to the sender only.
    let frame = serde_json::json!({
        "type": "send_message",
        "conversation": {"id": "no-such-conversation", "users": [{"id": alice}, {"id": bob}]},
        "sender": {"id": alice},
        "approach": "optimistic",
        "content": "hi"
    })
    .to_string();
    dispatch_contained(&backend.state, &alice_session, &frame).await;

    assert_eq!(
        recv(&mut alice_rx).await,
        ServerEvent::error("storage operation failed")
    );
    assert_silent(&mut bob_rx).await;
}

#[tokio::test]
async fn typing_indicators_reach_the_conversation_room_except_the_sender() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;
    let convo = backend
        .state
        .conversations
        .create(&[&alice, &bob])
        .await
        .unwrap();

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    let (_bob_session, mut bob_rx) = backend.connect(&bob).await;

    backend
        .state
        .typing
        .relay(
            &alice_session,
            ConversationId(convo.public_id.clone()),
            true,
        )
        .await
        .unwrap();

    assert_eq!(
        recv(&mut bob_rx).await,
        ServerEvent::StartTyping {
            typing: true,
            conversation_id: ConversationId(convo.public_id.clone()),
        }
    );
    assert_silent(&mut alice_rx).await;

    backend
        .state
        .typing
        .relay(
            &alice_session,
            ConversationId(convo.public_id.clone()),
            false,
        )
        .await
        .unwrap();

    assert_eq!(
        recv(&mut bob_rx).await,
        ServerEvent::StopTyping {
            typing: false,
            conversation_id: ConversationId(convo.public_id.clone()),
        }
    );
}

#[tokio::test]
async fn typing_with_empty_conversation_id_is_rejected() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let (alice_session, mut alice_rx) = backend.connect(&alice).await;

    let error = backend
        .state
        .typing
        .relay(&alice_session, ConversationId::from(""), true)
        .await
        .unwrap_err();
    assert!(matches!(error, RealtimeError::Validation(_)));

    // Through containment the sender hears the validation message.
    let frame = serde_json::json!({
        "type": "start_typing",
        "conversation_id": ""
    })
    .to_string();
    dispatch_contained(&backend.state, &alice_session, &frame).await;
    assert_eq!(
        recv(&mut alice_rx).await,
        ServerEvent::error("missing conversation id")
    );
    assert_silent(&mut alice_rx).await;
}

#[tokio::test]
async fn typing_joins_conversations_created_after_connect() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    let (bob_session, mut bob_rx) = backend.connect(&bob).await;

    let fresh = ConversationId::from("made-after-connect");

    // Nobody else is in the room yet.
    backend
        .state
        .typing
        .relay(&alice_session, fresh.clone(), true)
        .await
        .unwrap();
    assert_silent(&mut bob_rx).await;

    // Alice joined on first use, so Bob's signal now reaches her.
    backend
        .state
        .typing
        .relay(&bob_session, fresh.clone(), true)
        .await
        .unwrap();
    assert_eq!(
        recv(&mut alice_rx).await,
        ServerEvent::StartTyping {
            typing: true,
            conversation_id: fresh,
        }
    );
}

#[tokio::test]
async fn multi_device_presence_announces_once_per_transition() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;
    backend.users().add_friendship(&alice, &bob).await.unwrap();

    let (_bob_session, mut bob_rx) = backend.connect(&bob).await;

    // First device announces online.
    let (alice_phone, _alice_phone_rx) = backend.connect(&alice).await;
    assert_eq!(
        recv(&mut bob_rx).await,
        ServerEvent::PresenceChanged {
            user_id: UserId(alice.clone()),
            status: OnlineStatus::Online,
        }
    );

    // Second device is silent.
    let (alice_laptop, _alice_laptop_rx) = backend.connect(&alice).await;
    assert_silent(&mut bob_rx).await;
    assert_eq!(
        backend
            .state
            .presence
            .session_count(&UserId(alice.clone()))
            .await,
        2
    );

    // Dropping one device keeps the user online.
    backend.disconnect(&alice_phone).await;
    assert_silent(&mut bob_rx).await;
    let stored = backend
        .users()
        .find_by_public_id(&alice)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.online_status, OnlineStatus::Online);

    // Dropping the last device announces offline exactly once.
    backend.disconnect(&alice_laptop).await;
    assert_eq!(
        recv(&mut bob_rx).await,
        ServerEvent::PresenceChanged {
            user_id: UserId(alice.clone()),
            status: OnlineStatus::Offline,
        }
    );
    assert_silent(&mut bob_rx).await;
}

#[tokio::test]
async fn fan_out_to_participants_without_live_sessions_is_dropped() {
    let backend = TestBackend::new().await;

    let alice = backend.create_user("alice").await;
    let bob = backend.create_user("bob").await;
    let convo = backend
        .state
        .conversations
        .create(&[&alice, &bob])
        .await
        .unwrap();

    let (alice_session, mut alice_rx) = backend.connect(&alice).await;
    // Bob never connects.

    backend
        .state
        .message_router
        .route(
            &alice_session,
            incoming_message(
                Some(&convo.public_id),
                &[&alice, &bob],
                &alice,
                Some("optimistic"),
                "anyone there?",
            ),
        )
        .await
        .unwrap();

    // The sender still gets the confirmation; the absent recipient simply
    // receives nothing.
    assert!(matches!(
        recv(&mut alice_rx).await,
        ServerEvent::MessageReceived { .. }
    ));
    assert_silent(&mut alice_rx).await;
}
