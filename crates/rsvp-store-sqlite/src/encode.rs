//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, event dates as `YYYY-MM-DD`,
//! event times as `HH:MM:SS`. Row images in `change_log` are compact JSON
//! objects produced by the capture triggers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rsvp_core::{
  change::{ChangeEvent, Operation, Position, SourceTable},
  delivery::{DeadLetter, DeadLetterReason},
  model::{Category, Event, Registration, RegistrationDetails, RegistrationStatus, User},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

/// Timestamps written by older schema versions: RFC 3339 or SQL
/// `YYYY-MM-DD HH:MM:SS[.f]`, the latter taken as UTC.
pub fn decode_legacy_dt(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
    .map(|naive| naive.and_utc())
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::Decode(format!("date {s:?}: {e}")))
}

pub fn encode_time(t: NaiveTime) -> String { t.format("%H:%M:%S").to_string() }

pub fn decode_time(s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
    .map_err(|e| Error::Decode(format!("time {s:?}: {e}")))
}

pub fn decode_status(s: &str) -> Result<RegistrationStatus> { Ok(s.parse()?) }

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

// ─── Column lists ────────────────────────────────────────────────────────────

pub const USER_COLUMNS: &str =
  "id, username, email, password, full_name, created_at, updated_at";

pub const EVENT_COLUMNS: &str = "id, title, description, category, location, event_date, \
                                 event_time, organizer, capacity, created_at, updated_at";

pub const REGISTRATION_COLUMNS: &str = "id, user_id, event_id, registration_date, status, \
                                        email_sent, email_sent_at, notes, created_at, updated_at";

pub const DETAILS_COLUMNS: &str = "registration_id, status, registration_date, email_sent, \
                                   email_sent_at, notes, user_id, username, email, full_name, \
                                   event_id, event_title, event_description, event_category, \
                                   event_location, event_date, event_time, organizer";

pub const CHANGE_COLUMNS: &str =
  "position, table_name, row_id, operation, before_json, after_json, committed_at";

pub const DEAD_LETTER_COLUMNS: &str = "dead_letter_id, consumer, position, table_name, row_id, \
                                       operation, reason, attempts, last_error, change_json, \
                                       recorded_at, resolved_at";

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `users` row.
pub struct RawUser {
  pub id:         i64,
  pub username:   String,
  pub email:      String,
  pub password:   String,
  pub full_name:  Option<String>,
  pub created_at: String,
  pub updated_at: String,
}

impl RawUser {
  pub fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      username:   row.get(1)?,
      email:      row.get(2)?,
      password:   row.get(3)?,
      full_name:  row.get(4)?,
      created_at: row.get(5)?,
      updated_at: row.get(6)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      id:            self.id,
      username:      self.username,
      email:         self.email,
      password_hash: self.password,
      full_name:     self.full_name,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub fn read_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
  Ok(Category { id: row.get(0)?, name: row.get(1)? })
}

/// Raw values read directly from an `events` row.
pub struct RawEvent {
  pub id:          i64,
  pub title:       String,
  pub description: Option<String>,
  pub category:    Option<String>,
  pub location:    Option<String>,
  pub event_date:  String,
  pub event_time:  String,
  pub organizer:   Option<String>,
  pub capacity:    Option<i64>,
  pub created_at:  String,
  pub updated_at:  Option<String>,
}

impl RawEvent {
  pub fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Self::read_at(row, 0)
  }

  /// Read the event columns starting at column `offset`, for joins.
  pub fn read_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(offset)?,
      title:       row.get(offset + 1)?,
      description: row.get(offset + 2)?,
      category:    row.get(offset + 3)?,
      location:    row.get(offset + 4)?,
      event_date:  row.get(offset + 5)?,
      event_time:  row.get(offset + 6)?,
      organizer:   row.get(offset + 7)?,
      capacity:    row.get(offset + 8)?,
      created_at:  row.get(offset + 9)?,
      updated_at:  row.get(offset + 10)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      id:          self.id,
      title:       self.title,
      description: self.description,
      category:    self.category,
      location:    self.location,
      event_date:  decode_date(&self.event_date)?,
      event_time:  decode_time(&self.event_time)?,
      organizer:   self.organizer,
      capacity:    self.capacity,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_opt_dt(self.updated_at)?,
    })
  }
}

/// Raw values read directly from an `event_registrations` row.
pub struct RawRegistration {
  pub id:                i64,
  pub user_id:           i64,
  pub event_id:          i64,
  pub registration_date: String,
  pub status:            String,
  pub email_sent:        bool,
  pub email_sent_at:     Option<String>,
  pub notes:             Option<String>,
  pub created_at:        String,
  pub updated_at:        String,
}

impl RawRegistration {
  pub fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                row.get(0)?,
      user_id:           row.get(1)?,
      event_id:          row.get(2)?,
      registration_date: row.get(3)?,
      status:            row.get(4)?,
      email_sent:        row.get(5)?,
      email_sent_at:     row.get(6)?,
      notes:             row.get(7)?,
      created_at:        row.get(8)?,
      updated_at:        row.get(9)?,
    })
  }

  pub fn into_registration(self) -> Result<Registration> {
    Ok(Registration {
      id:                self.id,
      user_id:           self.user_id,
      event_id:          self.event_id,
      registration_date: decode_dt(&self.registration_date)?,
      status:            decode_status(&self.status)?,
      email_sent:        self.email_sent,
      email_sent_at:     decode_opt_dt(self.email_sent_at)?,
      notes:             self.notes,
      created_at:        decode_dt(&self.created_at)?,
      updated_at:        decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read directly from the `registration_details` view.
pub struct RawDetails {
  pub registration_id:   i64,
  pub status:            String,
  pub registration_date: String,
  pub email_sent:        bool,
  pub email_sent_at:     Option<String>,
  pub notes:             Option<String>,
  pub user_id:           i64,
  pub username:          String,
  pub email:             String,
  pub full_name:         Option<String>,
  pub event_id:          i64,
  pub event_title:       String,
  pub event_description: Option<String>,
  pub event_category:    Option<String>,
  pub event_location:    Option<String>,
  pub event_date:        String,
  pub event_time:        String,
  pub organizer:         Option<String>,
}

impl RawDetails {
  pub fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      registration_id:   row.get(0)?,
      status:            row.get(1)?,
      registration_date: row.get(2)?,
      email_sent:        row.get(3)?,
      email_sent_at:     row.get(4)?,
      notes:             row.get(5)?,
      user_id:           row.get(6)?,
      username:          row.get(7)?,
      email:             row.get(8)?,
      full_name:         row.get(9)?,
      event_id:          row.get(10)?,
      event_title:       row.get(11)?,
      event_description: row.get(12)?,
      event_category:    row.get(13)?,
      event_location:    row.get(14)?,
      event_date:        row.get(15)?,
      event_time:        row.get(16)?,
      organizer:         row.get(17)?,
    })
  }

  pub fn into_details(self) -> Result<RegistrationDetails> {
    Ok(RegistrationDetails {
      registration_id:   self.registration_id,
      status:            decode_status(&self.status)?,
      registration_date: decode_dt(&self.registration_date)?,
      email_sent:        self.email_sent,
      email_sent_at:     decode_opt_dt(self.email_sent_at)?,
      notes:             self.notes,
      user_id:           self.user_id,
      username:          self.username,
      email:             self.email,
      full_name:         self.full_name,
      event_id:          self.event_id,
      event_title:       self.event_title,
      event_description: self.event_description,
      event_category:    self.event_category,
      event_location:    self.event_location,
      event_date:        decode_date(&self.event_date)?,
      event_time:        decode_time(&self.event_time)?,
      organizer:         self.organizer,
    })
  }
}

/// Raw values read directly from a `change_log` row.
pub struct RawChange {
  pub position:     i64,
  pub table_name:   String,
  pub row_id:       i64,
  pub operation:    String,
  pub before_json:  Option<String>,
  pub after_json:   Option<String>,
  pub committed_at: String,
}

impl RawChange {
  pub fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      position:     row.get(0)?,
      table_name:   row.get(1)?,
      row_id:       row.get(2)?,
      operation:    row.get(3)?,
      before_json:  row.get(4)?,
      after_json:   row.get(5)?,
      committed_at: row.get(6)?,
    })
  }

  pub fn into_change(self) -> Result<ChangeEvent> {
    let parse_image = |s: Option<String>| -> Result<Option<serde_json::Value>> {
      Ok(s.as_deref().map(serde_json::from_str).transpose()?)
    };

    Ok(ChangeEvent {
      position:     Position(self.position),
      table:        self.table_name.parse::<SourceTable>()?,
      row_id:       self.row_id,
      operation:    self.operation.parse::<Operation>()?,
      before:       parse_image(self.before_json)?,
      after:        parse_image(self.after_json)?,
      committed_at: decode_dt(&self.committed_at)?,
    })
  }
}

/// Raw values read directly from a `dead_letters` row.
pub struct RawDeadLetter {
  pub dead_letter_id: String,
  pub consumer:       String,
  pub position:       i64,
  pub table_name:     String,
  pub row_id:         i64,
  pub operation:      String,
  pub reason:         String,
  pub attempts:       u32,
  pub last_error:     String,
  pub change_json:    String,
  pub recorded_at:    String,
  pub resolved_at:    Option<String>,
}

impl RawDeadLetter {
  pub fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      dead_letter_id: row.get(0)?,
      consumer:       row.get(1)?,
      position:       row.get(2)?,
      table_name:     row.get(3)?,
      row_id:         row.get(4)?,
      operation:      row.get(5)?,
      reason:         row.get(6)?,
      attempts:       row.get(7)?,
      last_error:     row.get(8)?,
      change_json:    row.get(9)?,
      recorded_at:    row.get(10)?,
      resolved_at:    row.get(11)?,
    })
  }

  pub fn into_dead_letter(self) -> Result<DeadLetter> {
    let reason = DeadLetterReason::parse(&self.reason)
      .ok_or_else(|| Error::Decode(format!("dead-letter reason {:?}", self.reason)))?;

    Ok(DeadLetter {
      dead_letter_id: Uuid::parse_str(&self.dead_letter_id)?,
      consumer:       self.consumer,
      position:       Position(self.position),
      table:          self.table_name.parse()?,
      row_id:         self.row_id,
      operation:      self.operation.parse()?,
      reason,
      attempts:       self.attempts,
      last_error:     self.last_error,
      change:         serde_json::from_str(&self.change_json)?,
      recorded_at:    decode_dt(&self.recorded_at)?,
      resolved_at:    decode_opt_dt(self.resolved_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  #[test]
  fn trigger_timestamps_decode() {
    // Format produced by strftime('%Y-%m-%dT%H:%M:%fZ', 'now').
    let dt = decode_dt("2026-10-19T08:15:30.250Z").unwrap();
    assert_eq!(dt.timestamp_subsec_millis(), 250);
  }

  #[test]
  fn dates_and_times_round_trip() {
    let d = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
    let t = NaiveTime::from_hms_opt(18, 30, 0).unwrap();
    assert_eq!(decode_date(&encode_date(d)).unwrap(), d);
    assert_eq!(decode_time(&encode_time(t)).unwrap(), t);
    assert!(decode_time("18:30").is_err());
  }

  #[test]
  fn legacy_timestamps_accept_sql_form() {
    let sql = decode_legacy_dt("2024-05-01 10:00:00").unwrap();
    assert_eq!(sql, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    assert_eq!(decode_legacy_dt("2024-05-01T12:00:00+02:00"), Some(sql));
    assert_eq!(decode_legacy_dt("2024-05-01 10:00:00.5").map(|d| d.timestamp_subsec_millis()), Some(500));
    assert_eq!(decode_legacy_dt("last tuesday"), None);
  }
}
