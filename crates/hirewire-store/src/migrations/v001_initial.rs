//! v001 -- Initial schema creation.
//!
//! Creates the `messages` collection and the two user collections,
//! `jobseekers` and `employers`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,  -- acceptance order
    id          TEXT NOT NULL UNIQUE,               -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    body        TEXT NOT NULL CHECK (length(trim(body)) > 0),
    created_at  TEXT NOT NULL,                      -- RFC-3339, microseconds, UTC
    read        INTEGER NOT NULL DEFAULT 0          -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender_id, receiver_id);

CREATE INDEX IF NOT EXISTS idx_messages_created
    ON messages(created_at DESC);

CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(receiver_id, sender_id, read);

-- ----------------------------------------------------------------
-- Job seekers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS jobseekers (
    id             TEXT PRIMARY KEY NOT NULL,
    name           TEXT NOT NULL,
    email          TEXT NOT NULL UNIQUE,
    job_preference TEXT,
    skills         TEXT NOT NULL DEFAULT '[]',      -- JSON array of strings
    experience     INTEGER NOT NULL DEFAULT 0,
    test_completed INTEGER NOT NULL DEFAULT 0       -- personality assessment taken
);

-- ----------------------------------------------------------------
-- Employers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS employers (
    id          TEXT PRIMARY KEY NOT NULL,
    name        TEXT NOT NULL,
    email       TEXT NOT NULL UNIQUE,
    industry    TEXT,
    description TEXT
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
