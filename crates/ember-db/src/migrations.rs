use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            telegram_id   INTEGER NOT NULL UNIQUE,
            username      TEXT,
            first_name    TEXT NOT NULL,
            last_name     TEXT,
            age           INTEGER,
            gender        TEXT NOT NULL,
            looking_for   TEXT NOT NULL,
            bio           TEXT,
            photos        TEXT NOT NULL DEFAULT '[]',
            interests     TEXT NOT NULL DEFAULT '[]',
            location      TEXT,
            preferences   TEXT NOT NULL DEFAULT '{}',
            settings      TEXT NOT NULL DEFAULT '{}',
            is_active     INTEGER NOT NULL DEFAULT 1,
            is_verified   INTEGER NOT NULL DEFAULT 1,
            last_seen     TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_active_seen
            ON users(is_active, last_seen);

        -- The swipe ledger. UNIQUE(actor_id, target_id) is the duplicate
        -- guard: concurrent swipes on the same pair resolve to one insert
        -- and constraint failures for the rest.
        CREATE TABLE IF NOT EXISTS swipes (
            id          TEXT PRIMARY KEY,
            actor_id    TEXT NOT NULL REFERENCES users(id),
            target_id   TEXT NOT NULL REFERENCES users(id),
            action      TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(actor_id, target_id)
        );

        CREATE INDEX IF NOT EXISTS idx_swipes_target_action
            ON swipes(target_id, action);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            media_url   TEXT,
            reply_to    TEXT REFERENCES messages(id),
            is_read     INTEGER NOT NULL DEFAULT 0,
            read_at     TEXT,
            is_deleted  INTEGER NOT NULL DEFAULT 0,
            deleted_at  TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, is_read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
