//! Envelope projections and the event-merge primitive.
//!
//! `merge_event` is the only write path; local edits build an [`Event`],
//! offer it to the replication seam, then merge it through the same code
//! remote events take. Deltas commute and the event id is the idempotency
//! key, so projections converge on every peer regardless of merge order.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rusqlite::{params, Transaction};
use uuid::Uuid;

use centime_shared::{Envelope, Event};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// All non-deleted envelopes joined with their current-month balance
    /// sums. Unordered; callers sort for display.
    pub fn all_envelopes(&self) -> Result<Vec<Envelope>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.balance, e.target, e.monthtarget, h.balance
             FROM envelopes AS e
             LEFT OUTER JOIN
                 (SELECT envelope, sum(balance) AS balance
                  FROM history
                  WHERE date >= ?1
                  GROUP BY envelope) AS h
             ON e.id = h.envelope
             WHERE NOT e.deleted",
        )?;

        let rows = stmt.query_map(params![start_of_month(Utc::now()).to_rfc3339()], |row| {
            let delta: Option<i64> = row.get(5)?;
            Ok(Envelope {
                id: parse_uuid(row, 0)?,
                name: row.get(1)?,
                balance: row.get(2)?,
                target: row.get(3)?,
                month_target: row.get(4)?,
                month_delta: delta.unwrap_or(0),
                deleted: false,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Look up an envelope, lazily materializing a zero-valued row for
    /// unknown ids. This is how events referring to yet-unseen envelopes
    /// become mergeable. Deleted envelopes are returned as-is; they keep
    /// accepting events.
    pub fn envelope(&self, id: Uuid) -> Result<Envelope> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let envelope = envelope_in_tx(&tx, id)?;
        tx.commit()?;
        Ok(envelope)
    }

    /// The envelope plus every event ever applied to it, tombstones
    /// included. Tombstone events get the current envelope name filled in,
    /// purely for display.
    pub fn envelope_with_history(&self, id: Uuid) -> Result<(Envelope, Vec<Event>)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let envelope = envelope_in_tx(&tx, id)?;

        let mut events = {
            let mut stmt = tx.prepare(
                "SELECT id, envelope, date, name, balance, target, monthtarget, deleted, comment
                 FROM history
                 WHERE envelope = ?1
                 ORDER BY date",
            )?;
            let rows = stmt.query_map(params![id.to_string()], row_to_event)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        tx.commit()?;

        for event in &mut events {
            if event.deleted {
                event.name = envelope.name.clone();
            }
        }

        Ok((envelope, events))
    }

    /// Rename an envelope and/or move its targets. Deltas are computed
    /// against the current projection; a call that changes nothing emits
    /// no event.
    pub fn apply_meta_change(
        &self,
        id: Uuid,
        name: &str,
        new_target: i64,
        new_month_target: i64,
    ) -> Result<()> {
        let env = self.envelope(id)?;

        if name == env.name && new_target == env.target && new_month_target == env.month_target {
            return Ok(());
        }

        tracing::debug!(
            envelope = %id,
            d_target = new_target - env.target,
            d_month_target = new_month_target - env.month_target,
            "meta change"
        );

        let mut event = Event::for_envelope(id);
        event.name = name.to_string();
        event.target = new_target - env.target;
        event.month_target = new_month_target - env.month_target;

        self.events().offer(&event);
        self.merge_event(&event)
    }

    /// Book a raw balance delta against an envelope.
    pub fn apply_balance_change(&self, id: Uuid, delta_cents: i64, comment: &str) -> Result<()> {
        tracing::debug!(envelope = %id, delta = delta_cents, "balance change");

        let mut event = Event::for_envelope(id);
        event.balance = delta_cents;
        event.comment = comment.to_string();

        self.events().offer(&event);
        self.merge_event(&event)
    }

    /// Tombstone an envelope. History stays, and later events against the
    /// id are still recorded.
    pub fn apply_delete(&self, id: Uuid) -> Result<()> {
        let mut event = Event::for_envelope(id);
        event.deleted = true;

        self.events().offer(&event);
        self.merge_event(&event)
    }

    /// Transfer the source's entire balance to the other envelopes in
    /// proportion to their monthly targets. Envelopes with a zero monthly
    /// target are skipped; truncation leaves a small residue in the source.
    pub fn spread(&self, source_id: Uuid) -> Result<()> {
        let envelopes = self.all_envelopes()?;
        let source = self.envelope(source_id)?;

        let total_month_target: i64 = envelopes
            .iter()
            .filter(|e| e.id != source_id)
            .map(|e| e.month_target)
            .sum();
        if total_month_target <= 0 {
            return Ok(());
        }

        for e in &envelopes {
            if e.id == source_id || e.month_target <= 0 {
                continue;
            }

            let pct = e.month_target as f64 / total_month_target as f64;
            let amount = (source.balance as f64 * pct) as i64;

            self.apply_balance_change(e.id, amount, &format!("Spread from {}", source.name))?;
            self.apply_balance_change(source_id, -amount, &format!("Spread to {}", e.name))?;
        }

        Ok(())
    }

    /// The only write primitive. One transaction: materialize the envelope,
    /// append to history, apply the deltas. Merging an event whose id is
    /// already in history commits as a no-op, which makes the whole
    /// replication protocol idempotent.
    pub fn merge_event(&self, event: &Event) -> Result<()> {
        tracing::debug!(event = %event.event_id, envelope = %event.envelope_id, "merging event");

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let env = envelope_in_tx(&tx, event.envelope_id)?;

        // The first peer to merge stamps the date; a carried date survives.
        let date = event.date.unwrap_or_else(Utc::now);

        let inserted = tx.execute(
            "INSERT INTO history (id, envelope, date, name, balance, target, monthtarget, deleted, comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO NOTHING",
            params![
                event.event_id.to_string(),
                event.envelope_id.to_string(),
                date.to_rfc3339(),
                event.name,
                event.balance,
                event.target,
                event.month_target,
                event.deleted,
                event.comment,
            ],
        )?;

        if inserted > 0 {
            let name = if event.name.is_empty() {
                env.name.as_str()
            } else {
                event.name.as_str()
            };
            tx.execute(
                "UPDATE envelopes
                 SET name = ?1, balance = balance + ?2, target = target + ?3,
                     monthtarget = monthtarget + ?4, deleted = ?5
                 WHERE id = ?6",
                params![
                    name,
                    event.balance,
                    event.target,
                    event.month_target,
                    event.deleted,
                    event.envelope_id.to_string(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn envelope_in_tx(tx: &Transaction<'_>, id: Uuid) -> Result<Envelope> {
    let found = tx
        .query_row(
            "SELECT id, name, balance, target, monthtarget, deleted
             FROM envelopes
             WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(Envelope {
                    id: parse_uuid(row, 0)?,
                    name: row.get(1)?,
                    balance: row.get(2)?,
                    target: row.get(3)?,
                    month_target: row.get(4)?,
                    month_delta: 0,
                    deleted: row.get(5)?,
                })
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some(envelope) = found {
        return Ok(envelope);
    }

    tx.execute(
        "INSERT INTO envelopes (id, name, balance, target, monthtarget, deleted)
         VALUES (?1, '', 0, 0, 0, 0)",
        params![id.to_string()],
    )?;
    Ok(Envelope::new(id))
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let date_str: String = row.get(2)?;
    let date: DateTime<Utc> = DateTime::parse_from_rfc3339(&date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Event {
        event_id: parse_uuid(row, 0)?,
        envelope_id: parse_uuid(row, 1)?,
        date: Some(date),
        name: row.get(3)?,
        balance: row.get(4)?,
        target: row.get(5)?,
        month_target: row.get(6)?,
        deleted: row.get(7)?,
        comment: row.get(8)?,
    })
}

fn parse_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// First instant of the current UTC month; the lower bound of the
/// month-delta window.
fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0) {
        chrono::LocalResult::Single(start) => start,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.sqlite")).unwrap();
        (dir, db)
    }

    fn history_len(db: &Database, id: Uuid) -> usize {
        db.envelope_with_history(id).unwrap().1.len()
    }

    #[test]
    fn create_and_rename() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Rent", 100_000, 80_000).unwrap();

        let all = db.all_envelopes().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].name, "Rent");
        assert_eq!(all[0].balance, 0);
        assert_eq!(all[0].target, 100_000);
        assert_eq!(all[0].month_target, 80_000);

        let (_, events) = db.envelope_with_history(id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].balance, 0);
        assert_eq!(events[0].target, 100_000);
        assert_eq!(events[0].month_target, 80_000);
    }

    #[test]
    fn meta_change_without_change_is_a_noop() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Rent", 100_000, 80_000).unwrap();
        db.apply_meta_change(id, "Rent", 100_000, 80_000).unwrap();

        assert_eq!(history_len(&db, id), 1);
    }

    #[test]
    fn balance_change_then_read() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Rent", 100_000, 80_000).unwrap();
        db.apply_balance_change(id, 50_000, "deposit").unwrap();

        let (envelope, events) = db.envelope_with_history(id).unwrap();
        assert_eq!(envelope.balance, 50_000);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn merge_is_idempotent() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_balance_change(id, 50_000, "deposit").unwrap();
        let (_, events) = db.envelope_with_history(id).unwrap();
        let event = events[0].clone();

        db.merge_event(&event).unwrap();
        db.merge_event(&event).unwrap();

        let (envelope, events) = db.envelope_with_history(id).unwrap();
        assert_eq!(envelope.balance, 50_000);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn cross_peer_merge_order_converges() {
        let (_dir1, p1) = test_db();
        let (_dir2, p2) = test_db();
        let id = Uuid::new_v4();

        let mut e1 = Event::for_envelope(id);
        e1.balance = 300;
        let mut e2 = Event::for_envelope(id);
        e2.balance = -100;

        p1.merge_event(&e1).unwrap();
        p1.merge_event(&e2).unwrap();
        p2.merge_event(&e2).unwrap();
        p2.merge_event(&e1).unwrap();

        assert_eq!(p1.envelope(id).unwrap().balance, 200);
        assert_eq!(p2.envelope(id).unwrap().balance, 200);
    }

    #[test]
    fn merge_materializes_unknown_envelope() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        let mut event = Event::for_envelope(id);
        event.name = "Food".to_string();
        event.balance = 1000;
        db.merge_event(&event).unwrap();

        let envelope = db.envelope(id).unwrap();
        assert_eq!(envelope.name, "Food");
        assert_eq!(envelope.balance, 1000);
        assert_eq!(history_len(&db, id), 1);
    }

    #[test]
    fn merge_keeps_name_when_event_name_empty() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Food", 0, 100).unwrap();
        db.apply_balance_change(id, 500, "groceries").unwrap();

        assert_eq!(db.envelope(id).unwrap().name, "Food");
    }

    #[test]
    fn apply_then_inverse_restores_projection() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Gifts", 5000, 1000).unwrap();
        let before = db.envelope(id).unwrap();

        let mut delta = Event::for_envelope(id);
        delta.balance = 1234;
        delta.target = -500;
        delta.month_target = 77;
        db.merge_event(&delta).unwrap();

        let mut inverse = Event::for_envelope(id);
        inverse.balance = -delta.balance;
        inverse.target = -delta.target;
        inverse.month_target = -delta.month_target;
        db.merge_event(&inverse).unwrap();

        let after = db.envelope(id).unwrap();
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.target, before.target);
        assert_eq!(after.month_target, before.month_target);
        assert_eq!(history_len(&db, id), 3);
    }

    #[test]
    fn deleted_envelope_disappears_but_keeps_recording() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Old", 0, 0).unwrap();
        db.apply_delete(id).unwrap();

        assert!(db.all_envelopes().unwrap().is_empty());

        // Late-arriving events against the tombstone are still recorded.
        db.apply_balance_change(id, 100, "straggler").unwrap();
        assert_eq!(history_len(&db, id), 3);
    }

    #[test]
    fn tombstone_events_show_envelope_name() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Travel", 0, 0).unwrap();
        db.apply_delete(id).unwrap();

        let (_, events) = db.envelope_with_history(id).unwrap();
        let tombstone = events.iter().find(|e| e.deleted).unwrap();
        assert_eq!(tombstone.name, "Travel");
    }

    #[test]
    fn spread_is_proportional_and_truncating() {
        let (_dir, db) = test_db();
        let source = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        db.apply_meta_change(source, "Buffer", 0, 0).unwrap();
        db.apply_balance_change(source, 1000, "pay day").unwrap();
        db.apply_meta_change(a, "A", 0, 10).unwrap();
        db.apply_meta_change(b, "B", 0, 20).unwrap();
        db.apply_meta_change(c, "C", 0, 30).unwrap();

        db.spread(source).unwrap();

        assert_eq!(db.envelope(a).unwrap().balance, 166);
        assert_eq!(db.envelope(b).unwrap().balance, 333);
        assert_eq!(db.envelope(c).unwrap().balance, 500);
        // The truncation residue stays in the source.
        assert_eq!(db.envelope(source).unwrap().balance, 1);
    }

    #[test]
    fn spread_skips_zero_month_targets() {
        let (_dir, db) = test_db();
        let source = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        db.apply_balance_change(source, 900, "pay day").unwrap();
        db.apply_meta_change(a, "A", 0, 0).unwrap();
        db.apply_meta_change(b, "B", 0, 300).unwrap();

        db.spread(source).unwrap();

        assert_eq!(db.envelope(a).unwrap().balance, 0);
        assert_eq!(db.envelope(b).unwrap().balance, 900);
        assert_eq!(db.envelope(source).unwrap().balance, 0);
    }

    #[test]
    fn spread_with_no_targets_is_a_noop() {
        let (_dir, db) = test_db();
        let source = Uuid::new_v4();

        db.apply_balance_change(source, 900, "pay day").unwrap();
        db.spread(source).unwrap();

        assert_eq!(db.envelope(source).unwrap().balance, 900);
    }

    #[test]
    fn month_delta_counts_only_current_month() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        db.apply_meta_change(id, "Fuel", 0, 0).unwrap();

        // An event dated well in the past must not count.
        let mut old = Event::for_envelope(id);
        old.balance = 700;
        old.date = Some(Utc.with_ymd_and_hms(2001, 1, 15, 12, 0, 0).unwrap());
        db.merge_event(&old).unwrap();

        db.apply_balance_change(id, 250, "this month").unwrap();

        let all = db.all_envelopes().unwrap();
        let fuel = all.iter().find(|e| e.id == id).unwrap();
        assert_eq!(fuel.balance, 950);
        assert_eq!(fuel.month_delta, 250);
    }

    #[test]
    fn carried_event_date_survives_merge() {
        let (_dir, db) = test_db();
        let id = Uuid::new_v4();

        let stamp = Utc.with_ymd_and_hms(2020, 6, 1, 8, 30, 0).unwrap();
        let mut event = Event::for_envelope(id);
        event.balance = 10;
        event.date = Some(stamp);
        db.merge_event(&event).unwrap();

        let (_, events) = db.envelope_with_history(id).unwrap();
        assert_eq!(events[0].date, Some(stamp));
    }
}
