//! In-memory invite codes, intentionally lost on restart. Redemption is
//! single-use: the code is removed the moment it is consumed rather than
//! left reusable until expiry.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

use crate::error::{AppError, AppResult};
use crate::models::{Invite, RoomId, UserId};

const INVITE_TTL_SECS: i64 = 60 * 60;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 8;

pub struct InviteTable {
    invites: Mutex<HashMap<String, Invite>>,
}

impl InviteTable {
    pub fn new() -> Self {
        Self {
            invites: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Invite>> {
        self.invites.lock().expect("invite table mutex poisoned")
    }

    pub fn issue(&self, room_id: &RoomId, created_by: &UserId, now: i64) -> Invite {
        let code = generate_code();
        let invite = Invite {
            invite_code: code.clone(),
            room_id: room_id.clone(),
            created_by: created_by.clone(),
            expires_at: now + INVITE_TTL_SECS,
        };
        self.lock().insert(code, invite.clone());
        invite
    }

    /// Consumes the invite if present, unexpired, and not already redeemed.
    /// Returns the room id to join. Never returns the same invite twice.
    pub fn redeem(&self, code: &str, now: i64) -> AppResult<RoomId> {
        let mut invites = self.lock();
        let invite = invites.remove(code).ok_or(AppError::NotFound)?;
        if invite.is_expired(now) {
            return Err(AppError::Expired);
        }
        Ok(invite.room_id)
    }

    /// Drops expired invites; callers may invoke this periodically alongside
    /// the room sweep. Not required for correctness since `redeem` itself
    /// checks expiry.
    pub fn sweep_expired(&self, now: i64) {
        self.lock().retain(|_, inv| !inv.is_expired(now));
    }
}

impl Default for InviteTable {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
