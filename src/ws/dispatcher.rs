//! Message classification and handlers. The envelope is a tagged variant;
//! dispatch is exhaustive pattern matching rather than a string-keyed branch.
//! `register` is handled separately by the session loop (it produces the
//! connection's binding and needs the outbound channel); everything here
//! assumes a binding already exists.

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AppError;
use crate::ice::IceServer;
use crate::models::{PeerId, PeerMetadata, PeerRole, RoomId};
use crate::registry::{Peer, RegistryError};
use crate::state::AppState;
use crate::store;

use super::messages::{ClientMessage, DiscoverFilters, PeerSummaryWire, RegisterRequest, ServerMessage};

pub struct Binding {
    pub room_id: RoomId,
    pub peer_id: PeerId,
}

pub enum DispatchOutcome {
    Reply(ServerMessage),
    None,
}

/// Resolves credentials, validates the room, and joins the Room Registry.
/// Returns the binding and the `registered_auth` reply on success.
pub async fn register(
    state: &AppState,
    req: RegisterRequest,
    tx: mpsc::Sender<Message>,
) -> Result<(Binding, ServerMessage, Option<ServerMessage>), AppError> {
    let now = now_epoch();
    let resolved = resolve_credentials(state, &req, now).await?;

    let room = store::require_room(&state.store, &resolved.room_id, now)?;

    let peer_id = req
        .peer_id
        .clone()
        .or_else(|| resolved.worker_name.clone())
        .ok_or_else(|| AppError::InvalidRequest("peer_id is required".to_string()))?;

    let role = req
        .role
        .unwrap_or(if resolved.is_worker { PeerRole::Worker } else { PeerRole::Peer });

    let metadata: PeerMetadata = match &req.metadata {
        Some(v) => serde_json::from_value(v.clone()).unwrap_or_default(),
        None => PeerMetadata::default(),
    };

    if state.registry.room_peer_count(&resolved.room_id) >= state.config.max_peers_per_room {
        return Err(AppError::RoomFull);
    }

    let peer = Peer {
        peer_id: peer_id.clone(),
        role,
        metadata,
        connected_at: now,
        is_admin: false,
        sender: tx,
    };

    state
        .registry
        .join(&resolved.room_id, peer)
        .map_err(registry_err)?;

    let mut admin_conflict = None;
    if req.is_admin {
        if let Err(current) = state.registry.set_admin(&resolved.room_id, &peer_id) {
            admin_conflict = Some(current);
        }
    }

    let peers = state.registry.list_room(&resolved.room_id);
    let peer_list: Vec<PeerId> = peers
        .iter()
        .filter(|p| p.peer_id != peer_id)
        .map(|p| p.peer_id.clone())
        .collect();
    let peer_metadata = peers
        .iter()
        .filter(|p| p.peer_id != peer_id)
        .map(|p| (p.peer_id.clone(), metadata_to_value(&p.metadata)))
        .collect();

    let (client_ice, mesh_ice) = ice_servers_for(state);

    state.metrics.record_connection();

    let reply = ServerMessage::RegisteredAuth {
        room_id: resolved.room_id.clone(),
        token: resolved.credential_echo,
        peer_id: peer_id.clone(),
        admin_peer_id: state.registry.admin_of(&resolved.room_id),
        peer_list,
        peer_metadata,
        ice_servers: client_ice,
        mesh_ice_servers: mesh_ice,
        otp_secret: resolved.is_worker.then(|| room.otp_secret.clone()),
    };

    let binding = Binding {
        room_id: resolved.room_id,
        peer_id,
    };

    // Admin conflict doesn't fit on the `registered_auth` envelope, so it is
    // reported as a follow-up message; the peer stays registered as non-admin.
    let conflict_reply = admin_conflict.map(|current_admin| ServerMessage::AdminConflict { current_admin });

    Ok((binding, reply, conflict_reply))
}

pub async fn dispatch(
    state: &AppState,
    binding: &Binding,
    message: ClientMessage,
) -> Result<DispatchOutcome, AppError> {
    match message {
        ClientMessage::Register(_) => Err(AppError::InvalidRequest("already registered".to_string())),
        ClientMessage::DiscoverPeers { filters, .. } => Ok(handle_discover(state, binding, filters)),
        ClientMessage::UpdateMetadata { peer_id, metadata } => {
            handle_update_metadata(state, binding, &peer_id, metadata)
        }
        ClientMessage::PeerMessage {
            from_peer_id,
            to_peer_id,
            payload,
        } => handle_peer_message(state, binding, &from_peer_id, &to_peer_id, payload).await,
        ClientMessage::MeshConnect {
            from_peer_id,
            target_peer_id,
            offer,
        } => {
            relay_mesh(
                state,
                binding,
                &from_peer_id,
                &target_peer_id,
                ServerMessage::MeshOffer { from_peer_id: from_peer_id.clone(), offer },
                true,
            )
            .await
        }
        ClientMessage::MeshAnswer {
            from_peer_id,
            target_peer_id,
            answer,
        } => {
            relay_mesh(
                state,
                binding,
                &from_peer_id,
                &target_peer_id,
                ServerMessage::MeshAnswer { from_peer_id: from_peer_id.clone(), answer },
                true,
            )
            .await
        }
        ClientMessage::IceCandidate {
            from_peer_id,
            target_peer_id,
            candidate,
        } => {
            relay_mesh(
                state,
                binding,
                &from_peer_id,
                &target_peer_id,
                ServerMessage::IceCandidate { from_peer_id: from_peer_id.clone(), candidate },
                false,
            )
            .await
        }
        ClientMessage::Offer { target, sdp, .. } => {
            relay_legacy(state, binding, &target, ServerMessage::Offer { sender: binding.peer_id.clone(), sdp }).await
        }
        ClientMessage::Answer { target, sdp, .. } => {
            relay_legacy(state, binding, &target, ServerMessage::Answer { sender: binding.peer_id.clone(), sdp }).await
        }
        ClientMessage::Candidate { target, candidate, .. } => {
            relay_legacy(
                state,
                binding,
                &target,
                ServerMessage::Candidate { sender: binding.peer_id.clone(), candidate },
            )
            .await
        }
    }
}

struct ResolvedCredential {
    room_id: RoomId,
    worker_name: Option<String>,
    is_worker: bool,
    /// Echoed back in `registered_auth.token` — the worker key or session
    /// token the caller authenticated with, so a client can keep reusing it.
    credential_echo: String,
}

/// Resolves the three credential shapes documented for `register`, in
/// priority order: worker API key, session token, legacy password.
async fn resolve_credentials(
    state: &AppState,
    req: &RegisterRequest,
    now: i64,
) -> Result<ResolvedCredential, AppError> {
    if let Some(api_key) = &req.api_key {
        let token = state.store.get_worker_token(api_key)?.ok_or(AppError::Unauthenticated)?;
        if !token.is_valid(now) {
            return Err(AppError::Unauthenticated);
        }
        store::require_room(&state.store, &token.room_id, now)?;
        return Ok(ResolvedCredential {
            room_id: token.room_id,
            worker_name: Some(token.worker_name),
            is_worker: true,
            credential_echo: api_key.clone(),
        });
    }

    if let Some(jwt) = &req.jwt {
        let claims = state.session_tokens.verify(jwt)?;
        let room_id = req
            .room_id
            .clone()
            .ok_or_else(|| AppError::InvalidRequest("room_id is required".to_string()))?;
        let membership = state.store.get_membership(&claims.sub, &room_id)?;
        if membership.is_none() {
            return Err(AppError::Forbidden);
        }
        return Ok(ResolvedCredential {
            room_id,
            worker_name: None,
            is_worker: false,
            credential_echo: jwt.clone(),
        });
    }

    if let (Some(id_token), Some(room_id), Some(token)) = (&req.id_token, &req.room_id, &req.token) {
        let verifier = state.legacy_verifier.read().await;
        let verifier = verifier.as_ref().ok_or(AppError::Unauthenticated)?;
        verifier.verify(id_token)?;
        let room = store::require_room(&state.store, room_id, now)?;
        if &room.password != token {
            return Err(AppError::Unauthenticated);
        }
        return Ok(ResolvedCredential {
            room_id: room_id.clone(),
            worker_name: None,
            is_worker: false,
            credential_echo: token.clone(),
        });
    }

    Err(AppError::Unauthenticated)
}

fn handle_discover(state: &AppState, binding: &Binding, filters: DiscoverFilters) -> DispatchOutcome {
    let peers = state.registry.list_room(&binding.room_id);
    let matching: Vec<PeerSummaryWire> = peers
        .into_iter()
        .filter(|p| p.peer_id != binding.peer_id)
        .filter(|p| filter_matches(p, &filters))
        .map(|p| PeerSummaryWire {
            peer_id: p.peer_id,
            role: p.role,
            metadata: metadata_to_value(&p.metadata),
            connected_at: p.connected_at,
        })
        .collect();
    let count = matching.len();
    DispatchOutcome::Reply(ServerMessage::PeerList { peers: matching, count })
}

fn filter_matches(peer: &crate::registry::PeerSummary, filters: &DiscoverFilters) -> bool {
    if let Some(role) = &filters.role {
        if peer.role.to_string() != *role {
            return false;
        }
    }
    if let Some(tags) = &filters.tags {
        if !tags.iter().any(|t| peer.metadata.tags.contains(t)) {
            return false;
        }
    }
    if let Some(properties) = &filters.properties {
        for (key, expected) in properties {
            let actual = peer.metadata.properties.get(key);
            if !property_matches(actual, expected) {
                return false;
            }
        }
    }
    true
}

fn property_matches(actual: Option<&Value>, expected: &Value) -> bool {
    if let Some(obj) = expected.as_object() {
        if let Some(gte) = obj.get("$gte") {
            return compare_numeric(actual, gte, |a, b| a >= b);
        }
        if let Some(lte) = obj.get("$lte") {
            return compare_numeric(actual, lte, |a, b| a <= b);
        }
        if let Some(eq) = obj.get("$eq") {
            return actual == Some(eq);
        }
        return false;
    }
    actual == Some(expected)
}

fn compare_numeric(actual: Option<&Value>, bound: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(Value::as_f64), bound.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn metadata_to_value(metadata: &PeerMetadata) -> Value {
    serde_json::to_value(metadata).unwrap_or(Value::Null)
}

fn handle_update_metadata(
    state: &AppState,
    binding: &Binding,
    peer_id: &PeerId,
    metadata: Value,
) -> Result<DispatchOutcome, AppError> {
    if peer_id != &binding.peer_id {
        return Err(AppError::Forbidden);
    }
    let update: PeerMetadata = serde_json::from_value(metadata).unwrap_or_default();
    let merged = state
        .registry
        .update_metadata(&binding.room_id, peer_id, update)
        .map_err(registry_err)?;
    Ok(DispatchOutcome::Reply(ServerMessage::MetadataUpdated {
        peer_id: peer_id.clone(),
        metadata: metadata_to_value(&merged),
    }))
}

async fn handle_peer_message(
    state: &AppState,
    binding: &Binding,
    from_peer_id: &PeerId,
    to_peer_id: &PeerId,
    payload: Value,
) -> Result<DispatchOutcome, AppError> {
    if from_peer_id != &binding.peer_id {
        return Err(AppError::Forbidden);
    }
    let envelope = ServerMessage::PeerMessage {
        from_peer_id: from_peer_id.clone(),
        to_peer_id: to_peer_id.clone(),
        payload,
    };
    send_to_peer(state, binding, to_peer_id, envelope).await?;
    state.metrics.record_message();
    Ok(DispatchOutcome::None)
}

async fn relay_mesh(
    state: &AppState,
    binding: &Binding,
    from_peer_id: &PeerId,
    target_peer_id: &PeerId,
    envelope: ServerMessage,
    missing_target_is_error: bool,
) -> Result<DispatchOutcome, AppError> {
    if from_peer_id != &binding.peer_id {
        return Err(AppError::Forbidden);
    }
    match send_to_peer(state, binding, target_peer_id, envelope).await {
        Ok(()) => {
            state.metrics.record_message();
            Ok(DispatchOutcome::None)
        }
        Err(AppError::PeerNotFound) if !missing_target_is_error => {
            debug!(target = %target_peer_id, "ice candidate target disconnected, suppressing");
            Ok(DispatchOutcome::None)
        }
        Err(e) => Err(e),
    }
}

async fn relay_legacy(
    state: &AppState,
    binding: &Binding,
    target: &PeerId,
    envelope: ServerMessage,
) -> Result<DispatchOutcome, AppError> {
    send_to_peer(state, binding, target, envelope).await?;
    state.metrics.record_message();
    Ok(DispatchOutcome::None)
}

async fn send_to_peer(
    state: &AppState,
    binding: &Binding,
    to_peer_id: &PeerId,
    envelope: ServerMessage,
) -> Result<(), AppError> {
    if state.registry.room_of(to_peer_id).as_ref() != Some(&binding.room_id) {
        return Err(AppError::PeerNotInRoom);
    }
    let sender = state
        .registry
        .sender_for(&binding.room_id, to_peer_id)
        .ok_or(AppError::PeerNotFound)?;
    let text = serde_json::to_string(&envelope).map_err(|e| AppError::Internal(e.to_string()))?;
    sender.try_send(Message::Text(text)).map_err(|_| AppError::DeliveryFailed)
}

fn registry_err(e: RegistryError) -> AppError {
    match e {
        RegistryError::Conflict => AppError::Conflict("peer_id already registered".to_string()),
        RegistryError::PeerNotFound => AppError::PeerNotFound,
    }
}

fn ice_servers_for(state: &AppState) -> (Vec<IceServer>, Vec<IceServer>) {
    (state.config.ice.client_servers(), state.config.ice.mesh_servers())
}

fn now_epoch() -> i64 {
    crate::util::now_epoch()
}
