//! v001 -- Initial schema creation.
//!
//! Creates the chat tables: `users`, `messages`, `reactions`, `dm_requests`
//! and `direct_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    username   TEXT NOT NULL UNIQUE,         -- case-sensitive (BINARY collation)
    color      TEXT NOT NULL DEFAULT '#000000',
    bio        TEXT,
    status     TEXT NOT NULL DEFAULT 'online',
    created_at TEXT NOT NULL                 -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Room messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    user_id           TEXT NOT NULL,              -- author
    content           TEXT NOT NULL,
    image_url         TEXT,
    reply_to_id       TEXT,                       -- may dangle after a delete
    is_edited         INTEGER NOT NULL DEFAULT 0,
    is_locked         INTEGER NOT NULL DEFAULT 0,
    locked_by_user_id TEXT,
    timestamp         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);

-- ----------------------------------------------------------------
-- Reactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    id         TEXT PRIMARY KEY NOT NULL,
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_reactions_unique
    ON reactions(message_id, user_id, emoji);

-- ----------------------------------------------------------------
-- DM requests (one row per unordered user pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS dm_requests (
    id           TEXT PRIMARY KEY NOT NULL,
    from_user_id TEXT NOT NULL,
    to_user_id   TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    timestamp    TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_dm_requests_pair
    ON dm_requests(min(from_user_id, to_user_id), max(from_user_id, to_user_id));

-- ----------------------------------------------------------------
-- Direct messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS direct_messages (
    id                TEXT PRIMARY KEY NOT NULL,
    from_user_id      TEXT NOT NULL,
    to_user_id        TEXT NOT NULL,
    content           TEXT NOT NULL,
    is_edited         INTEGER NOT NULL DEFAULT 0,
    is_pinned         INTEGER NOT NULL DEFAULT 0,
    is_read           INTEGER NOT NULL DEFAULT 0,
    is_locked         INTEGER NOT NULL DEFAULT 0,
    locked_by_user_id TEXT,
    timestamp         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_direct_messages_pair
    ON direct_messages(from_user_id, to_user_id, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
