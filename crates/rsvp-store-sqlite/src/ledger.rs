//! [`ChangeLog`] and [`DeliveryLedger`] for [`SqliteStore`].
//!
//! The change log is filled by triggers (see `schema.rs`); this module only
//! reads it. The ledger tables are written by the delivery coordinator.

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use rsvp_core::{
  change::{ChangeEvent, DedupKey, Position, SourceTable},
  delivery::DeadLetter,
  store::{ChangeLog, DeliveryLedger},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{CHANGE_COLUMNS, DEAD_LETTER_COLUMNS, RawChange, RawDeadLetter, encode_dt, encode_uuid},
  store::SqliteStore,
};

// ─── ChangeLog impl ──────────────────────────────────────────────────────────

impl ChangeLog for SqliteStore {
  type Error = Error;

  async fn read_changes(
    &self,
    after: Position,
    tables: &[SourceTable],
    limit: usize,
  ) -> Result<Vec<ChangeEvent>> {
    // Table names come from a closed enum, so inlining them is safe.
    let filter = if tables.is_empty() {
      String::new()
    } else {
      let names = tables.iter().map(|t| format!("'{}'", t.as_str())).collect::<Vec<_>>();
      format!("AND table_name IN ({})", names.join(", "))
    };
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_COLUMNS} FROM change_log
           WHERE position > ?1 {filter}
           ORDER BY position ASC
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![after.value(), limit], RawChange::read)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChange::into_change).collect()
  }

  async fn has_tombstone(&self, table: SourceTable, row_id: i64, after: Position) -> Result<bool> {
    let table = table.as_str();
    let found = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM change_log
               WHERE table_name = ?1 AND row_id = ?2 AND operation = 'delete' AND position > ?3
               LIMIT 1",
              rusqlite::params![table, row_id, after.value()],
              |_| Ok(()),
            )
            .optional()?
            .is_some(),
        )
      })
      .await?;
    Ok(found)
  }

  async fn head(&self) -> Result<Position> {
    let position: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COALESCE(MAX(position), 0) FROM change_log", [], |r| r.get(0))?)
      })
      .await?;
    Ok(Position(position))
  }
}

// ─── DeliveryLedger impl ─────────────────────────────────────────────────────

impl DeliveryLedger for SqliteStore {
  type Error = Error;

  async fn load_cursor(&self, consumer: &str) -> Result<Position> {
    let consumer = consumer.to_owned();
    let position: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT position FROM consumer_cursors WHERE consumer = ?1",
              rusqlite::params![consumer],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(position.map(Position).unwrap_or(Position::ZERO))
  }

  async fn save_cursor(&self, consumer: &str, position: Position) -> Result<()> {
    let consumer = consumer.to_owned();
    let now = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO consumer_cursors (consumer, position, updated_at) VALUES (?1, ?2, ?3)
           ON CONFLICT (consumer) DO UPDATE
           SET position   = MAX(position, excluded.position),
               updated_at = excluded.updated_at",
          rusqlite::params![consumer, position.value(), now],
        )?;
        // Keys at or below the cursor are never looked up again.
        tx.execute(
          "DELETE FROM processed_changes
           WHERE consumer = ?1
             AND position <= (SELECT position FROM consumer_cursors WHERE consumer = ?1)",
          rusqlite::params![consumer],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn is_processed(&self, consumer: &str, key: DedupKey) -> Result<bool> {
    let consumer = consumer.to_owned();
    let found = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM processed_changes
               WHERE consumer = ?1 AND table_name = ?2 AND row_id = ?3
                 AND operation = ?4 AND position = ?5",
              rusqlite::params![
                consumer,
                key.table.as_str(),
                key.row_id,
                key.operation.as_str(),
                key.position.value(),
              ],
              |_| Ok(()),
            )
            .optional()?
            .is_some(),
        )
      })
      .await?;
    Ok(found)
  }

  async fn mark_processed(&self, consumer: &str, key: DedupKey) -> Result<()> {
    let consumer = consumer.to_owned();
    let now = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        insert_processed(conn, &consumer, &key, &now)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_dead_letter(&self, letter: DeadLetter) -> Result<()> {
    let change_json = serde_json::to_string(&letter.change)?;
    let key = letter.change.dedup_key();
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          &format!(
            "INSERT INTO dead_letters ({DEAD_LETTER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
          ),
          rusqlite::params![
            encode_uuid(letter.dead_letter_id),
            letter.consumer,
            letter.position.value(),
            letter.table.as_str(),
            letter.row_id,
            letter.operation.as_str(),
            letter.reason.as_str(),
            letter.attempts,
            letter.last_error,
            change_json,
            encode_dt(letter.recorded_at),
            letter.resolved_at.map(encode_dt),
          ],
        )?;
        insert_processed(&tx, &letter.consumer, &key, &now)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_dead_letters(&self, unresolved_only: bool) -> Result<Vec<DeadLetter>> {
    let raws: Vec<RawDeadLetter> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters
           WHERE (?1 = 0 OR resolved_at IS NULL)
           ORDER BY recorded_at ASC, position ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![unresolved_only], RawDeadLetter::read)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDeadLetter::into_dead_letter).collect()
  }

  async fn resolve_dead_letter(&self, id: Uuid) -> Result<bool> {
    let id = encode_uuid(id);
    let now = encode_dt(Utc::now());
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE dead_letters SET resolved_at = ?2 WHERE dead_letter_id = ?1 AND resolved_at IS NULL",
          rusqlite::params![id, now],
        )?)
      })
      .await?;
    Ok(updated > 0)
  }
}

fn insert_processed(
  conn: &rusqlite::Connection,
  consumer: &str,
  key: &DedupKey,
  now: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO processed_changes
       (consumer, table_name, row_id, operation, position, processed_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![
      consumer,
      key.table.as_str(),
      key.row_id,
      key.operation.as_str(),
      key.position.value(),
      now,
    ],
  )?;
  Ok(())
}
