//! Data model shared by the persistent store, the credential engine, and the
//! in-memory room registry.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type RoomId = String;
pub type PeerId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: i64,
    pub last_login: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub created_by: UserId,
    pub password: String,
    pub otp_secret: String,
    pub expires_at: i64,
    pub name: Option<String>,
}

impl Room {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMembership {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub role: MembershipRole,
    pub invited_by: Option<UserId>,
    pub joined_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerToken {
    pub token_id: String,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub worker_name: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
}

impl WorkerToken {
    pub fn is_valid(&self, now: i64) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub invite_code: String,
    pub room_id: RoomId,
    pub created_by: UserId,
    pub expires_at: i64,
}

impl Invite {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Worker,
    Client,
    #[default]
    Peer,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerRole::Worker => "worker",
            PeerRole::Client => "client",
            PeerRole::Peer => "peer",
        };
        write!(f, "{s}")
    }
}

/// Open metadata document attached to a live peer: a tag set plus a loosely
/// typed property bag. Both fields merge independently on `update_metadata`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerMetadata {
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Any other top-level keys the peer sent, preserved verbatim and
    /// replaced wholesale (not merged) on update.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl PeerMetadata {
    /// Apply an `update_metadata` document on top of `self`: tags union,
    /// properties shallow-overwrite, everything else replaced wholesale.
    pub fn merge(&mut self, update: PeerMetadata) {
        self.tags.extend(update.tags);
        for (k, v) in update.properties {
            self.properties.insert(k, v);
        }
        for (k, v) in update.extra {
            self.extra.insert(k, v);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Metrics {
    pub total_connections: u64,
    pub total_messages: u64,
    pub rooms_created: u64,
}
