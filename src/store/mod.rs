//! Persistent Identity Store + Room Store, backed by an embedded SQLite
//! database (one file, WAL journal mode). All operations are primary-key or
//! secondary-index lookups; there are no full-table scans on the hot path.

mod migrate;

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AppError, AppResult};
use crate::models::{Invite, MembershipRole, Room, RoomMembership, User, WorkerToken};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrate::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrate::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    // ---- Users ----------------------------------------------------------

    pub fn upsert_user(&self, user: &User) -> AppResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (user_id, username, email, avatar_url, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                email = excluded.email,
                avatar_url = excluded.avatar_url,
                last_login = excluded.last_login",
            params![
                user.user_id,
                user.username,
                user.email,
                user.avatar_url,
                user.created_at,
                user.last_login
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> AppResult<Option<User>> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT user_id, username, email, avatar_url, created_at, last_login
                 FROM users WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(User {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        avatar_url: row.get(3)?,
                        created_at: row.get(4)?,
                        last_login: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ---- Rooms ------------------------------------------------------------

    pub fn put_room(&self, room: &Room) -> AppResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO rooms (room_id, created_by, password, otp_secret, expires_at, name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(room_id) DO UPDATE SET
                password = excluded.password,
                otp_secret = excluded.otp_secret,
                expires_at = excluded.expires_at,
                name = excluded.name",
            params![
                room.room_id,
                room.created_by,
                room.password,
                room.otp_secret,
                room.expires_at,
                room.name
            ],
        )?;
        Ok(())
    }

    pub fn get_room(&self, room_id: &str) -> AppResult<Option<Room>> {
        let conn = self.lock();
        let room = conn
            .query_row(
                "SELECT room_id, created_by, password, otp_secret, expires_at, name
                 FROM rooms WHERE room_id = ?1",
                [room_id],
                Self::row_to_room,
            )
            .optional()?;
        Ok(room)
    }

    fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
        Ok(Room {
            room_id: row.get(0)?,
            created_by: row.get(1)?,
            password: row.get(2)?,
            otp_secret: row.get(3)?,
            expires_at: row.get(4)?,
            name: row.get(5)?,
        })
    }

    /// Delete a room and cascade its memberships and worker tokens.
    /// Idempotent: deleting a room that does not exist is not an error.
    pub fn delete_room_cascade(&self, room_id: &str) -> AppResult<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM worker_tokens WHERE room_id = ?1", [room_id])?;
        conn.execute("DELETE FROM room_memberships WHERE room_id = ?1", [room_id])?;
        conn.execute("DELETE FROM rooms WHERE room_id = ?1", [room_id])?;
        Ok(())
    }

    /// Evict rooms whose TTL has passed, cascading. Returns the number removed.
    pub fn sweep_expired_rooms(&self, now: i64) -> AppResult<usize> {
        let conn = self.lock();
        let ids: Vec<String> = {
            let mut stmt = conn.prepare("SELECT room_id FROM rooms WHERE expires_at <= ?1")?;
            let rows = stmt.query_map([now], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for id in &ids {
            conn.execute("DELETE FROM worker_tokens WHERE room_id = ?1", [id])?;
            conn.execute("DELETE FROM room_memberships WHERE room_id = ?1", [id])?;
            conn.execute("DELETE FROM rooms WHERE room_id = ?1", [id])?;
        }
        Ok(ids.len())
    }

    // ---- Memberships -------------------------------------------------------

    pub fn put_membership(&self, m: &RoomMembership) -> AppResult<()> {
        let conn = self.lock();
        let role = membership_role_str(m.role);
        conn.execute(
            "INSERT INTO room_memberships (user_id, room_id, role, invited_by, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, room_id) DO NOTHING",
            params![m.user_id, m.room_id, role, m.invited_by, m.joined_at],
        )?;
        Ok(())
    }

    pub fn get_membership(&self, user_id: &str, room_id: &str) -> AppResult<Option<RoomMembership>> {
        let conn = self.lock();
        let membership = conn
            .query_row(
                "SELECT user_id, room_id, role, invited_by, joined_at
                 FROM room_memberships WHERE user_id = ?1 AND room_id = ?2",
                params![user_id, room_id],
                Self::row_to_membership,
            )
            .optional()?;
        Ok(membership)
    }

    pub fn query_memberships_by_user(&self, user_id: &str) -> AppResult<Vec<RoomMembership>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, room_id, role, invited_by, joined_at
             FROM room_memberships WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map([user_id], Self::row_to_membership)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn query_memberships_by_room(&self, room_id: &str) -> AppResult<Vec<RoomMembership>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, room_id, role, invited_by, joined_at
             FROM room_memberships WHERE room_id = ?1",
        )?;
        let rows = stmt.query_map([room_id], Self::row_to_membership)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomMembership> {
        let role: String = row.get(2)?;
        Ok(RoomMembership {
            user_id: row.get(0)?,
            room_id: row.get(1)?,
            role: membership_role_from_str(&role),
            invited_by: row.get(3)?,
            joined_at: row.get(4)?,
        })
    }

    // ---- Worker tokens -------------------------------------------------------

    pub fn put_worker_token(&self, t: &WorkerToken) -> AppResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO worker_tokens
                (token_id, user_id, room_id, worker_name, created_at, expires_at, revoked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(token_id) DO UPDATE SET revoked_at = excluded.revoked_at",
            params![
                t.token_id,
                t.user_id,
                t.room_id,
                t.worker_name,
                t.created_at,
                t.expires_at,
                t.revoked_at
            ],
        )?;
        Ok(())
    }

    pub fn get_worker_token(&self, token_id: &str) -> AppResult<Option<WorkerToken>> {
        let conn = self.lock();
        let token = conn
            .query_row(
                "SELECT token_id, user_id, room_id, worker_name, created_at, expires_at, revoked_at
                 FROM worker_tokens WHERE token_id = ?1",
                [token_id],
                Self::row_to_token,
            )
            .optional()?;
        Ok(token)
    }

    pub fn query_tokens_by_user(&self, user_id: &str) -> AppResult<Vec<WorkerToken>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT token_id, user_id, room_id, worker_name, created_at, expires_at, revoked_at
             FROM worker_tokens WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map([user_id], Self::row_to_token)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn revoke_worker_token(&self, token_id: &str, owner_user_id: &str, now: i64) -> AppResult<bool> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE worker_tokens SET revoked_at = ?1
             WHERE token_id = ?2 AND user_id = ?3 AND revoked_at IS NULL",
            params![now, token_id, owner_user_id],
        )?;
        Ok(updated > 0)
    }

    fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkerToken> {
        Ok(WorkerToken {
            token_id: row.get(0)?,
            user_id: row.get(1)?,
            room_id: row.get(2)?,
            worker_name: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
            revoked_at: row.get(6)?,
        })
    }
}

fn membership_role_str(role: MembershipRole) -> &'static str {
    match role {
        MembershipRole::Owner => "owner",
        MembershipRole::Member => "member",
    }
}

fn membership_role_from_str(s: &str) -> MembershipRole {
    match s {
        "owner" => MembershipRole::Owner,
        _ => MembershipRole::Member,
    }
}

/// Helper used by HTTP handlers: look up a room or convert absence/expiry
/// into the taxonomy's `not_found`/`expired`.
pub fn require_room(store: &Store, room_id: &str, now: i64) -> AppResult<Room> {
    let room = store.get_room(room_id)?.ok_or(AppError::NotFound)?;
    if room.is_expired(now) {
        return Err(AppError::Expired);
    }
    Ok(room)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MembershipRole;

    fn sample_user(id: &str) -> User {
        User {
            user_id: id.to_string(),
            username: format!("user-{id}"),
            email: None,
            avatar_url: None,
            created_at: 1000,
            last_login: 1000,
        }
    }

    #[test]
    fn upsert_user_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let u = sample_user("u1");
        store.upsert_user(&u).unwrap();
        store.upsert_user(&u).unwrap();
        let fetched = store.get_user("u1").unwrap().unwrap();
        assert_eq!(fetched.username, "user-u1");
    }

    #[test]
    fn room_cascade_delete_removes_memberships_and_tokens() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_user(&sample_user("owner")).unwrap();
        let room = Room {
            room_id: "r1".to_string(),
            created_by: "owner".to_string(),
            password: "pw".to_string(),
            otp_secret: "otp".to_string(),
            expires_at: 99999999,
            name: None,
        };
        store.put_room(&room).unwrap();
        store
            .put_membership(&RoomMembership {
                user_id: "owner".to_string(),
                room_id: "r1".to_string(),
                role: MembershipRole::Owner,
                invited_by: None,
                joined_at: 1000,
            })
            .unwrap();
        store
            .put_worker_token(&WorkerToken {
                token_id: "tok1".to_string(),
                user_id: "owner".to_string(),
                room_id: "r1".to_string(),
                worker_name: "w1".to_string(),
                created_at: 1000,
                expires_at: None,
                revoked_at: None,
            })
            .unwrap();

        store.delete_room_cascade("r1").unwrap();

        assert!(store.get_room("r1").unwrap().is_none());
        assert!(store.query_memberships_by_room("r1").unwrap().is_empty());
        assert!(store.get_worker_token("tok1").unwrap().is_none());
    }

    #[test]
    fn sweep_expired_rooms_removes_only_expired() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_user(&sample_user("owner")).unwrap();
        for (id, expires_at) in [("live", 99999999), ("dead", 1)] {
            store
                .put_room(&Room {
                    room_id: id.to_string(),
                    created_by: "owner".to_string(),
                    password: "pw".to_string(),
                    otp_secret: "otp".to_string(),
                    expires_at,
                    name: None,
                })
                .unwrap();
        }
        let removed = store.sweep_expired_rooms(1000).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_room("live").unwrap().is_some());
        assert!(store.get_room("dead").unwrap().is_none());
    }

    #[test]
    fn revoke_worker_token_is_owner_scoped_and_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_user(&sample_user("owner")).unwrap();
        store
            .put_worker_token(&WorkerToken {
                token_id: "tok1".to_string(),
                user_id: "owner".to_string(),
                room_id: "r1".to_string(),
                worker_name: "w1".to_string(),
                created_at: 1000,
                expires_at: None,
                revoked_at: None,
            })
            .unwrap();

        assert!(!store.revoke_worker_token("tok1", "someone_else", 2000).unwrap());
        assert!(store.revoke_worker_token("tok1", "owner", 2000).unwrap());
        // Idempotent: second revoke finds no un-revoked row left to update.
        assert!(!store.revoke_worker_token("tok1", "owner", 3000).unwrap());

        let tok = store.get_worker_token("tok1").unwrap().unwrap();
        assert_eq!(tok.revoked_at, Some(2000));
    }
}
