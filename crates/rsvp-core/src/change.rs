//! Change events: immutable records of committed row mutations.
//!
//! Every insert, update, and delete on a captured table is appended to the
//! store's change log in the same transaction as the mutation itself, and is
//! assigned a strictly increasing [`Position`]. Row images are full rows, not
//! diffs, so consumers can act without re-querying the store.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
  Error, Result,
  model::{Event, Registration},
};

// ─── Position ────────────────────────────────────────────────────────────────

/// A change-log sequence number. Positions are assigned at commit and never
/// reused.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Position(pub i64);

impl Position {
  /// Before the first change; tailing from here replays the whole log.
  pub const ZERO: Self = Self(0);

  pub fn value(self) -> i64 { self.0 }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

// ─── Source table ────────────────────────────────────────────────────────────

/// The captured tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
  Events,
  EventRegistrations,
}

impl SourceTable {
  pub const ALL: [Self; 2] = [Self::Events, Self::EventRegistrations];

  /// The SQL table name, which is also the `table_name` column value.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Events => "events",
      Self::EventRegistrations => "event_registrations",
    }
  }
}

impl fmt::Display for SourceTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for SourceTable {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "events" => Ok(Self::Events),
      "event_registrations" => Ok(Self::EventRegistrations),
      other => Err(Error::Invalid(format!("unknown source table: {other:?}"))),
    }
  }
}

// ─── Operation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  Insert,
  Update,
  Delete,
}

impl Operation {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Insert => "insert",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Operation {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "insert" => Ok(Self::Insert),
      "update" => Ok(Self::Update),
      "delete" => Ok(Self::Delete),
      other => Err(Error::Invalid(format!("unknown operation: {other:?}"))),
    }
  }
}

// ─── ChangeEvent ─────────────────────────────────────────────────────────────

/// An immutable record of one committed mutation.
///
/// `before` is present for updates and deletes, `after` for inserts and
/// updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
  pub position:     Position,
  pub table:        SourceTable,
  pub row_id:       i64,
  pub operation:    Operation,
  pub before:       Option<serde_json::Value>,
  pub after:        Option<serde_json::Value>,
  pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
  pub fn dedup_key(&self) -> DedupKey {
    DedupKey {
      table:     self.table,
      row_id:    self.row_id,
      operation: self.operation,
      position:  self.position,
    }
  }

  /// The key that serialises processing: changes to the same row are applied
  /// strictly in log order.
  pub fn row_key(&self) -> RowKey { RowKey { table: self.table, row_id: self.row_id } }

  pub fn before_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
    decode_image(self.before.as_ref())
  }

  pub fn after_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
    decode_image(self.after.as_ref())
  }

  /// Typed row images for a registration change; `None` for other tables.
  pub fn registration_images(
    &self,
  ) -> Result<Option<(Option<Registration>, Option<Registration>)>> {
    if self.table != SourceTable::EventRegistrations {
      return Ok(None);
    }
    Ok(Some((self.before_as()?, self.after_as()?)))
  }

  /// The post-image of an event change; `None` for other tables or deletes.
  pub fn event_after(&self) -> Result<Option<Event>> {
    if self.table != SourceTable::Events {
      return Ok(None);
    }
    self.after_as()
  }
}

fn decode_image<T: DeserializeOwned>(image: Option<&serde_json::Value>) -> Result<Option<T>> {
  image.map(|v| serde_json::from_value(v.clone())).transpose().map_err(Error::from)
}

/// Deduplication key: a change replayed with an already-processed key is
/// dropped without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
  pub table:     SourceTable,
  pub row_id:    i64,
  pub operation: Operation,
  pub position:  Position,
}

/// Identifies a source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
  pub table:  SourceTable,
  pub row_id: i64,
}

impl fmt::Display for RowKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.table, self.row_id)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;
  use crate::model::RegistrationStatus;

  fn registration_json(status: &str, email_sent: bool) -> serde_json::Value {
    json!({
      "id": 7,
      "user_id": 1,
      "event_id": 2,
      "registration_date": "2026-10-19T10:00:00Z",
      "status": status,
      "email_sent": email_sent,
      "email_sent_at": null,
      "notes": null,
      "created_at": "2026-10-19T10:00:00Z",
      "updated_at": "2026-10-19T10:00:00Z",
    })
  }

  #[test]
  fn registration_images_decode() {
    let change = ChangeEvent {
      position:     Position(3),
      table:        SourceTable::EventRegistrations,
      row_id:       7,
      operation:    Operation::Update,
      before:       Some(registration_json("registered", false)),
      after:        Some(registration_json("cancelled", false)),
      committed_at: Utc.timestamp_opt(0, 0).unwrap(),
    };

    let (before, after) = change.registration_images().unwrap().unwrap();
    assert_eq!(before.unwrap().status, RegistrationStatus::Registered);
    assert_eq!(after.unwrap().status, RegistrationStatus::Cancelled);
    assert!(change.event_after().unwrap().is_none());
  }

  #[test]
  fn dedup_key_includes_position() {
    let mut change = ChangeEvent {
      position:     Position(1),
      table:        SourceTable::Events,
      row_id:       4,
      operation:    Operation::Delete,
      before:       None,
      after:        None,
      committed_at: Utc.timestamp_opt(0, 0).unwrap(),
    };
    let first = change.dedup_key();
    change.position = Position(2);
    assert_ne!(first, change.dedup_key());
    assert_eq!(change.row_key(), RowKey { table: SourceTable::Events, row_id: 4 });
  }

  #[test]
  fn table_names_parse() {
    for table in SourceTable::ALL {
      assert_eq!(table.as_str().parse::<SourceTable>().unwrap(), table);
    }
  }
}
