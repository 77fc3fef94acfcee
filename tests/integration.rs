//! End-to-end coverage across the credential engine, store, registry, and
//! dispatcher together — the properties in the design doc are only really
//! exercised once these layers are wired up the way the session loop wires
//! them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc;

use meshsignal::config::Config;
use meshsignal::credentials::{issue_worker_api_key, SessionTokens};
use meshsignal::error::AppError;
use meshsignal::ice::IceConfig;
use meshsignal::models::{MembershipRole, PeerRole, Room, RoomMembership, User, WorkerToken};
use meshsignal::state::AppState;
use meshsignal::store::Store;
use meshsignal::util::now_epoch;
use meshsignal::ws::dispatcher;
use meshsignal::ws::messages::{ClientMessage, DiscoverFilters, RegisterRequest, ServerMessage};

const TEST_PRIV_KEY: &str = include_str!("fixtures/test_rsa_private.pem");
const TEST_PUB_KEY: &str = include_str!("fixtures/test_rsa_public.pem");

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_state() -> AppState {
    test_state_with_capacity(64)
}

fn test_state_with_capacity(max_peers_per_room: usize) -> AppState {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let n = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("meshsignal_test_{nanos}_{n}.db"));
    let store = Store::open(path.to_str().unwrap()).expect("open test store");
    let session_tokens = SessionTokens::new(TEST_PRIV_KEY, TEST_PUB_KEY, "meshsignal").unwrap();

    let config = Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        database_path: path.to_str().unwrap().to_string(),
        session_signing_key_pem: TEST_PRIV_KEY.to_string(),
        session_verifying_key_pem: TEST_PUB_KEY.to_string(),
        oauth_client_id: String::new(),
        oauth_client_secret: String::new(),
        oauth_redirect_uri: String::new(),
        legacy_jwks_url: None,
        legacy_issuer: None,
        ice: IceConfig::from_env_and_file(None, None, None, None, None),
        max_peers_per_room,
        ui_origin: None,
    };

    AppState::new(config, store, session_tokens)
}

fn outbound_channel() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
    mpsc::channel(16)
}

async fn recv_json(rx: &mut mpsc::Receiver<Message>) -> Value {
    match rx.recv().await.expect("channel closed before a message arrived") {
        Message::Text(text) => serde_json::from_str(&text).expect("server message must be valid JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

fn seed_owner_room(state: &AppState, user_id: &str, room_id: &str, now: i64) -> Room {
    state
        .store
        .upsert_user(&User {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            email: None,
            avatar_url: None,
            created_at: now,
            last_login: now,
        })
        .unwrap();
    let room = Room {
        room_id: room_id.to_string(),
        created_by: user_id.to_string(),
        password: "room-password".to_string(),
        otp_secret: "OTPSECRET".to_string(),
        expires_at: now + 86_400,
        name: None,
    };
    state.store.put_room(&room).unwrap();
    state
        .store
        .put_membership(&RoomMembership {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            role: MembershipRole::Owner,
            invited_by: None,
            joined_at: now,
        })
        .unwrap();
    room
}

fn issue_worker_token(state: &AppState, user_id: &str, room_id: &str, worker_name: &str, now: i64) -> String {
    let key = issue_worker_api_key();
    state
        .store
        .put_worker_token(&WorkerToken {
            token_id: key.clone(),
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            worker_name: worker_name.to_string(),
            created_at: now,
            expires_at: None,
            revoked_at: None,
        })
        .unwrap();
    key
}

fn register_request_for_worker(api_key: &str, peer_id: &str, tags: &[&str], status: &str, is_admin: bool) -> RegisterRequest {
    RegisterRequest {
        api_key: Some(api_key.to_string()),
        jwt: None,
        id_token: None,
        token: None,
        room_id: None,
        peer_id: Some(peer_id.to_string()),
        role: Some(PeerRole::Worker),
        metadata: Some(serde_json::json!({
            "tags": tags,
            "properties": { "status": status },
        })),
        is_admin,
    }
}

fn register_request_for_client(jwt: &str, room_id: &str, peer_id: &str) -> RegisterRequest {
    RegisterRequest {
        api_key: None,
        jwt: Some(jwt.to_string()),
        id_token: None,
        token: None,
        room_id: Some(room_id.to_string()),
        peer_id: Some(peer_id.to_string()),
        role: Some(PeerRole::Client),
        metadata: None,
        is_admin: false,
    }
}

// Scenario 1 + 2: owner creates a room, a worker and an invited client
// register, discovery finds the worker by tag/property filter, and a
// metadata update that flips the worker to "busy" removes it from that
// same filtered view.
#[tokio::test]
async fn discover_then_metadata_update_filters_busy_worker() {
    let state = test_state();
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    let api_key = issue_worker_token(&state, "userA", "R1", "w1", now);
    let jwt = state.session_tokens.issue("userB", "bob", now).unwrap();
    state
        .store
        .put_membership(&RoomMembership {
            user_id: "userB".to_string(),
            room_id: "R1".to_string(),
            role: MembershipRole::Member,
            invited_by: Some("userA".to_string()),
            joined_at: now,
        })
        .unwrap();

    let (worker_tx, _worker_rx) = outbound_channel();
    let (_binding_w, reply_w, conflict_w) = dispatcher::register(
        &state,
        register_request_for_worker(&api_key, "w1", &["gpu"], "available", false),
        worker_tx,
    )
    .await
    .unwrap();
    assert!(conflict_w.is_none());
    match reply_w {
        ServerMessage::RegisteredAuth { otp_secret, .. } => {
            assert_eq!(otp_secret.as_deref(), Some("OTPSECRET"));
        }
        _ => panic!("expected registered_auth"),
    }

    let (client_tx, _client_rx) = outbound_channel();
    let (client_binding, reply_c, _) =
        dispatcher::register(&state, register_request_for_client(&jwt, "R1", "c1"), client_tx)
            .await
            .unwrap();
    match reply_c {
        ServerMessage::RegisteredAuth { peer_list, otp_secret, .. } => {
            assert_eq!(peer_list, vec!["w1".to_string()]);
            assert!(otp_secret.is_none(), "non-worker callers never see the OTP secret");
        }
        _ => panic!("expected registered_auth"),
    }

    let filters = DiscoverFilters {
        role: Some("worker".to_string()),
        tags: Some(vec!["gpu".to_string()]),
        properties: Some(std::collections::HashMap::from([(
            "status".to_string(),
            serde_json::json!("available"),
        )])),
    };
    let outcome = dispatcher::dispatch(
        &state,
        &client_binding,
        ClientMessage::DiscoverPeers {
            from_peer_id: Some("c1".to_string()),
            filters: filters_clone(&filters),
        },
    )
    .await
    .unwrap();
    let found = match outcome {
        dispatcher::DispatchOutcome::Reply(ServerMessage::PeerList { peers, count }) => {
            assert_eq!(count, 1);
            peers
        }
        _ => panic!("expected peer_list"),
    };
    assert_eq!(found[0].peer_id, "w1");

    // Worker goes busy; the same filter now excludes it.
    let update_outcome = dispatcher::dispatch(
        &state,
        &dispatcher::Binding {
            room_id: "R1".to_string(),
            peer_id: "w1".to_string(),
        },
        ClientMessage::UpdateMetadata {
            peer_id: "w1".to_string(),
            metadata: serde_json::json!({ "properties": { "status": "busy" } }),
        },
    )
    .await
    .unwrap();
    assert!(matches!(
        update_outcome,
        dispatcher::DispatchOutcome::Reply(ServerMessage::MetadataUpdated { .. })
    ));

    let outcome = dispatcher::dispatch(
        &state,
        &client_binding,
        ClientMessage::DiscoverPeers {
            from_peer_id: Some("c1".to_string()),
            filters,
        },
    )
    .await
    .unwrap();
    match outcome {
        dispatcher::DispatchOutcome::Reply(ServerMessage::PeerList { count, .. }) => assert_eq!(count, 0),
        _ => panic!("expected peer_list"),
    }
}

fn filters_clone(f: &DiscoverFilters) -> DiscoverFilters {
    DiscoverFilters {
        role: f.role.clone(),
        tags: f.tags.clone(),
        properties: f.properties.clone(),
    }
}

// Scenario 3: a second admin claim while one is already held is reported as
// a conflict, not granted; once the incumbent disconnects, a fresh
// registration can claim it.
#[tokio::test]
async fn admin_designation_is_a_singleton_per_room() {
    let state = test_state();
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    let key_w2 = issue_worker_token(&state, "userA", "R1", "w2", now);
    let key_w3 = issue_worker_token(&state, "userA", "R1", "w3", now);

    let (tx_w2, _rx_w2) = outbound_channel();
    let (_binding_w2, _reply_w2, conflict_w2) = dispatcher::register(
        &state,
        register_request_for_worker(&key_w2, "w2", &[], "idle", true),
        tx_w2,
    )
    .await
    .unwrap();
    assert!(conflict_w2.is_none());
    assert_eq!(state.registry.admin_of(&"R1".to_string()), Some("w2".to_string()));

    let (tx_w3, _rx_w3) = outbound_channel();
    let (_binding_w3, _reply_w3, conflict_w3) = dispatcher::register(
        &state,
        register_request_for_worker(&key_w3, "w3", &[], "idle", true),
        tx_w3,
    )
    .await
    .unwrap();
    match conflict_w3 {
        Some(ServerMessage::AdminConflict { current_admin }) => assert_eq!(current_admin, "w2"),
        _ => panic!("expected an admin_conflict reply"),
    }
    assert_eq!(state.registry.admin_of(&"R1".to_string()), Some("w2".to_string()));

    // w2 disconnects; w3 can now claim admin on a fresh registration.
    state.registry.leave(&"w2".to_string());
    assert!(state.registry.admin_of(&"R1".to_string()).is_none());

    let (tx_w3b, _rx_w3b) = outbound_channel();
    let (_binding, _reply, conflict) = dispatcher::register(
        &state,
        register_request_for_worker(&key_w3, "w3", &[], "idle", true),
        tx_w3b,
    )
    .await
    .unwrap();
    assert!(conflict.is_none());
    assert_eq!(state.registry.admin_of(&"R1".to_string()), Some("w3".to_string()));
}

// Scenario 4 / P6: a peer in one room cannot reach a peer in another room,
// and the other peer is never notified.
#[tokio::test]
async fn peer_message_across_rooms_is_rejected_and_never_delivered() {
    let state = test_state();
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    seed_owner_room(&state, "userA", "R2", now);
    let key_p1 = issue_worker_token(&state, "userA", "R1", "p1", now);
    let key_p2 = issue_worker_token(&state, "userA", "R2", "p2", now);

    let (tx_p1, _rx_p1) = outbound_channel();
    let (binding_p1, _, _) = dispatcher::register(
        &state,
        register_request_for_worker(&key_p1, "p1", &[], "idle", false),
        tx_p1,
    )
    .await
    .unwrap();

    let (tx_p2, mut rx_p2) = outbound_channel();
    dispatcher::register(
        &state,
        register_request_for_worker(&key_p2, "p2", &[], "idle", false),
        tx_p2,
    )
    .await
    .unwrap();

    let result = dispatcher::dispatch(
        &state,
        &binding_p1,
        ClientMessage::PeerMessage {
            from_peer_id: "p1".to_string(),
            to_peer_id: "p2".to_string(),
            payload: serde_json::json!({}),
        },
    )
    .await;
    assert!(matches!(result, Err(AppError::PeerNotInRoom)));
    assert!(
        rx_p2.try_recv().is_err(),
        "p2 must never receive anything from a peer in a different room"
    );
}

// Scenario 5 / P9: deleting a room as its owner cascades to memberships and
// worker tokens, and a worker key for the deleted room stops authenticating.
#[tokio::test]
async fn owner_deletion_cascades_and_revokes_worker_access() {
    let state = test_state();
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    let api_key = issue_worker_token(&state, "userA", "R1", "w1", now);
    state
        .store
        .put_membership(&RoomMembership {
            user_id: "userB".to_string(),
            room_id: "R1".to_string(),
            role: MembershipRole::Member,
            invited_by: Some("userA".to_string()),
            joined_at: now,
        })
        .unwrap();

    state.store.delete_room_cascade("R1").unwrap();

    assert!(state.store.get_membership("userA", "R1").unwrap().is_none());
    assert!(state.store.get_membership("userB", "R1").unwrap().is_none());

    let (tx, _rx) = outbound_channel();
    let result = dispatcher::register(
        &state,
        register_request_for_worker(&api_key, "w1", &[], "idle", false),
        tx,
    )
    .await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}

// Scenario 6: a mesh offer is relayed byte-identical, with no interpretation
// of the SDP payload.
#[tokio::test]
async fn mesh_connect_relays_the_offer_opaquely() {
    let state = test_state();
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    let key_w1 = issue_worker_token(&state, "userA", "R1", "w1", now);
    let key_w2 = issue_worker_token(&state, "userA", "R1", "w2", now);

    let (tx_w1, _rx_w1) = outbound_channel();
    let (binding_w1, _, _) = dispatcher::register(
        &state,
        register_request_for_worker(&key_w1, "w1", &[], "idle", false),
        tx_w1,
    )
    .await
    .unwrap();

    let (tx_w2, mut rx_w2) = outbound_channel();
    dispatcher::register(
        &state,
        register_request_for_worker(&key_w2, "w2", &[], "idle", false),
        tx_w2,
    )
    .await
    .unwrap();

    let offer = serde_json::json!({ "sdp": "<opaque>" });
    let outcome = dispatcher::dispatch(
        &state,
        &binding_w1,
        ClientMessage::MeshConnect {
            from_peer_id: "w1".to_string(),
            target_peer_id: "w2".to_string(),
            offer: offer.clone(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(outcome, dispatcher::DispatchOutcome::None));

    let delivered = recv_json(&mut rx_w2).await;
    assert_eq!(delivered["type"], "mesh_offer");
    assert_eq!(delivered["from_peer_id"], "w1");
    assert_eq!(delivered["offer"], offer);
}

// P8: a revoked worker token is rejected on register regardless of how
// recently it was valid.
#[tokio::test]
async fn revoked_worker_token_is_rejected_on_register() {
    let state = test_state();
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    let api_key = issue_worker_token(&state, "userA", "R1", "w1", now);
    state.store.revoke_worker_token(&api_key, "userA", now).unwrap();

    let (tx, _rx) = outbound_channel();
    let result = dispatcher::register(
        &state,
        register_request_for_worker(&api_key, "w1", &[], "idle", false),
        tx,
    )
    .await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}

// P1: two simultaneous registrations with the same peer_id in the same room
// cannot both succeed.
#[tokio::test]
async fn duplicate_peer_id_registration_conflicts() {
    let state = test_state();
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    let key_a = issue_worker_token(&state, "userA", "R1", "dup", now);
    let key_b = issue_worker_token(&state, "userA", "R1", "dup", now);

    let (tx_a, _rx_a) = outbound_channel();
    dispatcher::register(
        &state,
        register_request_for_worker(&key_a, "dup", &[], "idle", false),
        tx_a,
    )
    .await
    .unwrap();

    let (tx_b, _rx_b) = outbound_channel();
    let result = dispatcher::register(
        &state,
        register_request_for_worker(&key_b, "dup", &[], "idle", false),
        tx_b,
    )
    .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

// A room at its configured capacity rejects further registrations with the
// dedicated ROOM_FULL code rather than a generic conflict.
#[tokio::test]
async fn registration_past_capacity_is_rejected_as_room_full() {
    let state = test_state_with_capacity(1);
    let now = now_epoch();
    seed_owner_room(&state, "userA", "R1", now);
    let key_1 = issue_worker_token(&state, "userA", "R1", "w1", now);
    let key_2 = issue_worker_token(&state, "userA", "R1", "w2", now);

    let (tx_1, _rx_1) = outbound_channel();
    dispatcher::register(
        &state,
        register_request_for_worker(&key_1, "w1", &[], "idle", false),
        tx_1,
    )
    .await
    .unwrap();

    let (tx_2, _rx_2) = outbound_channel();
    let result = dispatcher::register(
        &state,
        register_request_for_worker(&key_2, "w2", &[], "idle", false),
        tx_2,
    )
    .await;
    assert!(matches!(result, Err(AppError::RoomFull)));
    assert_eq!(result.unwrap_err().code(), "ROOM_FULL");
}
