//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `envelopes` (the projection) and `history`
//! (the append-only event ledger).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Envelopes (projection; all amounts in signed cents)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS envelopes (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name        TEXT NOT NULL,
    balance     INTEGER NOT NULL,
    target      INTEGER NOT NULL,
    monthtarget INTEGER NOT NULL,
    deleted     INTEGER NOT NULL DEFAULT 0   -- boolean 0/1
);

-- ----------------------------------------------------------------
-- History (append-only; primary key doubles as idempotency key)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS history (
    id          TEXT PRIMARY KEY NOT NULL,   -- event UUID
    envelope    TEXT NOT NULL,               -- FK -> envelopes(id)
    date        TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    name        TEXT NOT NULL,
    balance     INTEGER NOT NULL,
    target      INTEGER NOT NULL,
    monthtarget INTEGER NOT NULL,
    deleted     INTEGER NOT NULL DEFAULT 0,
    comment     TEXT NOT NULL,

    FOREIGN KEY (envelope) REFERENCES envelopes(id)
);

CREATE INDEX IF NOT EXISTS idx_history_envelope ON history(envelope);
CREATE INDEX IF NOT EXISTS idx_history_date ON history(date);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
