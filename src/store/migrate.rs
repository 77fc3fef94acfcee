//! Schema creation, run once at startup. Statements are idempotent
//! (`CREATE TABLE IF NOT EXISTS`) so re-running against an existing database
//! file is a no-op, matching the incremental-migration style this store is
//! grounded on.

use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            email TEXT,
            avatar_url TEXT,
            created_at INTEGER NOT NULL,
            last_login INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rooms (
            room_id TEXT PRIMARY KEY,
            created_by TEXT NOT NULL REFERENCES users(user_id),
            password TEXT NOT NULL,
            otp_secret TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            name TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_rooms_expires_at ON rooms(expires_at);

        CREATE TABLE IF NOT EXISTS room_memberships (
            user_id TEXT NOT NULL REFERENCES users(user_id),
            room_id TEXT NOT NULL REFERENCES rooms(room_id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            invited_by TEXT,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, room_id)
        );
        CREATE INDEX IF NOT EXISTS idx_memberships_room ON room_memberships(room_id);
        CREATE INDEX IF NOT EXISTS idx_memberships_user ON room_memberships(user_id);

        CREATE TABLE IF NOT EXISTS worker_tokens (
            token_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id),
            room_id TEXT NOT NULL REFERENCES rooms(room_id) ON DELETE CASCADE,
            worker_name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            revoked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_worker_tokens_user ON worker_tokens(user_id);
        CREATE INDEX IF NOT EXISTS idx_worker_tokens_room ON worker_tokens(room_id);
        ",
    )
}
