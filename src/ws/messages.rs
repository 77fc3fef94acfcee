//! Wire envelope types for the WebSocket plane. The dispatch tag is `type`;
//! everything else is message-specific fields. `metadata`/`payload`/SDP
//! bodies are carried as raw [`serde_json::Value`] and never parsed — the
//! server transports them, it does not interpret them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{PeerId, PeerRole, RoomId};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Register(RegisterRequest),
    DiscoverPeers {
        #[serde(default)]
        from_peer_id: Option<PeerId>,
        #[serde(default)]
        filters: DiscoverFilters,
    },
    UpdateMetadata {
        peer_id: PeerId,
        metadata: Value,
    },
    PeerMessage {
        from_peer_id: PeerId,
        to_peer_id: PeerId,
        payload: Value,
    },
    MeshConnect {
        from_peer_id: PeerId,
        target_peer_id: PeerId,
        offer: Value,
    },
    MeshAnswer {
        from_peer_id: PeerId,
        target_peer_id: PeerId,
        answer: Value,
    },
    IceCandidate {
        from_peer_id: PeerId,
        target_peer_id: PeerId,
        candidate: Value,
    },
    // Legacy relay, retained for older peers.
    Offer {
        sender: PeerId,
        target: PeerId,
        sdp: Value,
    },
    Answer {
        sender: PeerId,
        target: PeerId,
        sdp: Value,
    },
    Candidate {
        sender: PeerId,
        target: PeerId,
        candidate: Value,
    },
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    #[serde(default)]
    pub role: Option<PeerRole>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverFilters {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub properties: Option<std::collections::HashMap<String, Value>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisteredAuth {
        room_id: RoomId,
        token: String,
        peer_id: PeerId,
        admin_peer_id: Option<PeerId>,
        peer_list: Vec<PeerId>,
        peer_metadata: std::collections::HashMap<PeerId, Value>,
        ice_servers: Vec<crate::ice::IceServer>,
        mesh_ice_servers: Vec<crate::ice::IceServer>,
        #[serde(skip_serializing_if = "Option::is_none")]
        otp_secret: Option<String>,
    },
    PeerList {
        peers: Vec<PeerSummaryWire>,
        count: usize,
    },
    MetadataUpdated {
        peer_id: PeerId,
        metadata: Value,
    },
    PeerMessage {
        from_peer_id: PeerId,
        to_peer_id: PeerId,
        payload: Value,
    },
    MeshOffer {
        from_peer_id: PeerId,
        offer: Value,
    },
    MeshAnswer {
        from_peer_id: PeerId,
        answer: Value,
    },
    IceCandidate {
        from_peer_id: PeerId,
        candidate: Value,
    },
    AdminConflict {
        current_admin: PeerId,
    },
    // Legacy relay, forwarded verbatim to `target`.
    Offer {
        sender: PeerId,
        sdp: Value,
    },
    Answer {
        sender: PeerId,
        sdp: Value,
    },
    Candidate {
        sender: PeerId,
        candidate: Value,
    },
}

#[derive(Debug, Serialize)]
pub struct PeerSummaryWire {
    pub peer_id: PeerId,
    pub role: PeerRole,
    pub metadata: Value,
    pub connected_at: i64,
}
