//! v001 -- Initial schema creation.
//!
//! Creates `principals`, `channel_records` and `channel_members`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Principals (one row per collection the principal appears in)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS principals (
    collection   TEXT NOT NULL,               -- instructors / learners / guests
    id           TEXT NOT NULL,
    display_name TEXT NOT NULL,
    avatar_url   TEXT,
    updated_at   TEXT NOT NULL,               -- RFC-3339

    PRIMARY KEY (collection, id)
);

-- ----------------------------------------------------------------
-- Channel records (groups, premium groups, classes, conversations)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channel_records (
    class        TEXT NOT NULL,               -- ChannelClass wire name
    id           TEXT NOT NULL,
    display_name TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    avatar_url   TEXT,
    owner_id     TEXT,
    updated_at   TEXT NOT NULL,

    PRIMARY KEY (class, id)
);

-- ----------------------------------------------------------------
-- Channel membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channel_members (
    class      TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    member_id  TEXT NOT NULL,

    PRIMARY KEY (class, channel_id, member_id),
    FOREIGN KEY (class, channel_id) REFERENCES channel_records(class, id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_channel_members_member ON channel_members(member_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
