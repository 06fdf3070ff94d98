//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] behind a mutex
//! and guarantees that migrations are run before any other operation. The
//! mutex makes the handle shareable between the HTTP handlers and the
//! replication tasks; actual write serialization is SQLite's single-writer
//! contract.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tokio::sync::mpsc;

use centime_shared::Event;

use crate::error::{Result, StoreError};
use crate::events::EventSource;
use crate::migrations;

pub struct Database {
    conn: Mutex<Connection>,
    events: EventSource,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl Database {
    /// Open (or create) the ledger at an explicit path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        let count: i64 = conn.query_row(
            "SELECT count(*) FROM envelopes WHERE NOT deleted",
            [],
            |row| row.get(0),
        )?;
        tracing::info!(path = %path.as_ref().display(), envelopes = count, "opened ledger");

        let (events, events_rx) = EventSource::new();

        Ok(Self {
            conn: Mutex::new(conn),
            events,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// The channel surface local writes offer their events to.
    pub fn events(&self) -> &EventSource {
        &self.events
    }

    /// Hand out the single consuming end of the event channel.
    ///
    /// Returns `None` on the second and later calls; there is exactly one
    /// replicator.
    pub fn take_event_stream(&self) -> Option<mpsc::Receiver<Event>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.sqlite")).expect("should open");

        // Reopening must be a no-op thanks to idempotent migrations.
        drop(db);
        Database::open(dir.path().join("test.sqlite")).expect("should reopen");
    }

    #[test]
    fn event_stream_is_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.sqlite")).unwrap();

        assert!(db.take_event_stream().is_some());
        assert!(db.take_event_stream().is_none());
    }
}
