//! v002 -- Polls and ephemeral files.
//!
//! Adds `polls`, `poll_votes` and `files`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 1 to version 2.
const UP_SQL: &str = r#"
-- Polls, one per room message
CREATE TABLE IF NOT EXISTS polls (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    message_id TEXT NOT NULL UNIQUE,
    question   TEXT NOT NULL,
    options    TEXT NOT NULL,               -- JSON array of strings
    timestamp  TEXT NOT NULL
);

-- One vote per (poll, user); re-voting overwrites
CREATE TABLE IF NOT EXISTS poll_votes (
    poll_id      TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    option_index INTEGER NOT NULL,
    voted_at     TEXT NOT NULL,
    PRIMARY KEY (poll_id, user_id)
);

-- Ephemeral uploads
CREATE TABLE IF NOT EXISTS files (
    id            TEXT PRIMARY KEY NOT NULL,
    message_id    TEXT,
    filename      TEXT NOT NULL,            -- stored name inside the upload dir
    original_name TEXT NOT NULL,
    size          INTEGER NOT NULL,
    mime_type     TEXT NOT NULL,
    uploaded_at   TEXT NOT NULL,
    expires_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_expires ON files(expires_at);
"#;

/// Apply the v002 migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
