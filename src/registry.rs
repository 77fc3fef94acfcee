//! Room Registry: the in-memory authoritative map of live rooms to live
//! peers. Mutations are serialized per room via `DashMap`'s entry API rather
//! than a single global lock, since contention is per-room in practice.

use std::collections::HashMap;
use std::fmt;

use axum::extract::ws::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::models::{PeerId, PeerMetadata, PeerRole, RoomId};

#[derive(Debug)]
pub enum RegistryError {
    Conflict,
    PeerNotFound,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Conflict => write!(f, "peer_id already registered in room"),
            RegistryError::PeerNotFound => write!(f, "peer not registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// A live, connected peer. The socket handle is a channel, not the socket
/// itself — the WebSocket writer task owns the socket and drains this
/// channel; the Registry never touches the transport directly.
pub struct Peer {
    pub peer_id: PeerId,
    pub role: PeerRole,
    pub metadata: PeerMetadata,
    pub connected_at: i64,
    pub is_admin: bool,
    pub sender: mpsc::Sender<Message>,
}

#[derive(Debug, Clone)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub role: PeerRole,
    pub metadata: PeerMetadata,
    pub connected_at: i64,
}

impl From<&Peer> for PeerSummary {
    fn from(p: &Peer) -> Self {
        Self {
            peer_id: p.peer_id.clone(),
            role: p.role,
            metadata: p.metadata.clone(),
            connected_at: p.connected_at,
        }
    }
}

#[derive(Default)]
struct RoomLive {
    peers: HashMap<PeerId, Peer>,
    admin_peer_id: Option<PeerId>,
}

/// Outcome of a `leave`: whether the room is now empty and who the cleared
/// admin was, if any.
pub struct LeaveOutcome {
    pub room_id: RoomId,
    pub was_admin: bool,
    pub room_now_empty: bool,
}

pub struct Registry {
    rooms: DashMap<RoomId, RoomLive>,
    peer_to_room: DashMap<PeerId, RoomId>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            peer_to_room: DashMap::new(),
        }
    }

    /// Registers `peer` under `(room_id, peer_id)`. Creates the RoomLive entry
    /// lazily. Rejects a duplicate `peer_id` within the room rather than
    /// overwriting it (P1).
    pub fn join(&self, room_id: &RoomId, peer: Peer) -> Result<(), RegistryError> {
        // A peer_id is globally keyed in peer_to_room for O(1) lookup, but
        // uniqueness is enforced per-room, not globally.
        let mut room = self.rooms.entry(room_id.clone()).or_default();
        if room.peers.contains_key(&peer.peer_id) {
            return Err(RegistryError::Conflict);
        }
        self.peer_to_room.insert(peer.peer_id.clone(), room_id.clone());
        room.peers.insert(peer.peer_id.clone(), peer);
        Ok(())
    }

    /// Removes a peer from its room. Destroys the RoomLive entry if it is now
    /// empty. Synchronous and idempotent: leaving an already-absent peer is a
    /// no-op that reports `room_now_empty = true` only if nothing remains.
    pub fn leave(&self, peer_id: &PeerId) -> Option<LeaveOutcome> {
        let room_id = self.peer_to_room.remove(peer_id)?.1;

        let room_now_empty = match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(mut entry) => {
                let room = entry.get_mut();
                let was_admin = room.peers.remove(peer_id).is_some()
                    && room.admin_peer_id.as_deref() == Some(peer_id.as_str());
                if was_admin {
                    room.admin_peer_id = None;
                }
                let now_empty = room.peers.is_empty();
                if now_empty {
                    entry.remove();
                }
                return Some(LeaveOutcome {
                    room_id,
                    was_admin,
                    room_now_empty: now_empty,
                });
            }
            Entry::Vacant(_) => true,
        };

        Some(LeaveOutcome {
            room_id,
            was_admin: false,
            room_now_empty,
        })
    }

    pub fn room_of(&self, peer_id: &PeerId) -> Option<RoomId> {
        self.peer_to_room.get(peer_id).map(|r| r.clone())
    }

    pub fn list_room(&self, room_id: &RoomId) -> Vec<PeerSummary> {
        self.rooms
            .get(room_id)
            .map(|room| room.peers.values().map(PeerSummary::from).collect())
            .unwrap_or_default()
    }

    pub fn admin_of(&self, room_id: &RoomId) -> Option<PeerId> {
        self.rooms.get(room_id).and_then(|room| room.admin_peer_id.clone())
    }

    pub fn room_peer_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }

    /// Attempts to claim admin for `peer_id`. Returns `Ok(())` if claimed (or
    /// already held by this peer), `Err(current)` if another peer holds it —
    /// the requester remains registered as non-admin (P2).
    pub fn set_admin(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), PeerId> {
        let mut room = self.rooms.entry(room_id.clone()).or_default();
        match &room.admin_peer_id {
            Some(current) if current != peer_id => Err(current.clone()),
            _ => {
                room.admin_peer_id = Some(peer_id.clone());
                if let Some(p) = room.peers.get_mut(peer_id) {
                    p.is_admin = true;
                }
                Ok(())
            }
        }
    }

    pub fn sender_for(&self, room_id: &RoomId, peer_id: &PeerId) -> Option<mpsc::Sender<Message>> {
        self.rooms
            .get(room_id)
            .and_then(|room| room.peers.get(peer_id).map(|p| p.sender.clone()))
    }

    pub fn update_metadata(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        update: PeerMetadata,
    ) -> Result<PeerMetadata, RegistryError> {
        let mut room = self.rooms.get_mut(room_id).ok_or(RegistryError::PeerNotFound)?;
        let peer = room.peers.get_mut(peer_id).ok_or(RegistryError::PeerNotFound)?;
        peer.metadata.merge(update);
        Ok(peer.metadata.clone())
    }

    pub fn total_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_peers(&self) -> usize {
        self.rooms.iter().map(|r| r.peers.len()).sum()
    }

    pub fn peers_by_role(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for room in self.rooms.iter() {
            for peer in room.peers.values() {
                *counts.entry(role_label(peer.role)).or_insert(0) += 1;
            }
        }
        counts
    }
}

fn role_label(role: PeerRole) -> &'static str {
    match role {
        PeerRole::Worker => "worker",
        PeerRole::Client => "client",
        PeerRole::Peer => "peer",
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
