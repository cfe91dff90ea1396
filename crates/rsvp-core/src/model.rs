//! Entity types owned by the registration store.
//!
//! Row ids are the store's integer primary keys. Timestamps are UTC and set by
//! the store, never accepted from callers.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

// ─── Users ───────────────────────────────────────────────────────────────────

/// A registered account. The password credential is an argon2 PHC string and
/// is never serialised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub id:            i64,
  pub username:      String,
  pub email:         String,
  #[serde(skip_serializing, default)]
  pub password_hash: String,
  pub full_name:     Option<String>,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

impl User {
  /// The name used to greet the user: full name when set, username otherwise.
  pub fn display_name(&self) -> &str {
    self.full_name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.username)
  }
}

/// Input to [`crate::store::RegistrationStore::create_user`]. The password is
/// plaintext here and hashed by the store before it is persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
  pub username:  String,
  pub email:     String,
  pub password:  String,
  pub full_name: Option<String>,
}

impl NewUser {
  /// Reject obviously malformed input before touching the store.
  pub fn validate(&self) -> Result<(), Error> {
    if self.username.trim().is_empty() {
      return Err(Error::Invalid("username is required".into()));
    }
    let Some((local, domain)) = self.email.split_once('@') else {
      return Err(Error::Invalid(format!("invalid email: {:?}", self.email)));
    };
    if local.is_empty() || !domain.contains('.') {
      return Err(Error::Invalid(format!("invalid email: {:?}", self.email)));
    }
    if self.password.chars().count() < 8 {
      return Err(Error::Invalid("password must be at least 8 characters".into()));
    }
    Ok(())
  }
}

// ─── Categories ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
  pub id:   i64,
  pub name: String,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// An event that users can register for. Also the shape of the `events` row
/// image carried by change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub id:          i64,
  pub title:       String,
  pub description: Option<String>,
  /// Free-text label, validated against the category set on write.
  pub category:    Option<String>,
  pub location:    Option<String>,
  pub event_date:  NaiveDate,
  pub event_time:  NaiveTime,
  pub organizer:   Option<String>,
  /// Maximum number of `registered` rows; `None` means unlimited.
  pub capacity:    Option<i64>,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  Option<DateTime<Utc>>,
}

/// Input to `create_event` and `update_event`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
  pub title:       String,
  pub description: Option<String>,
  pub category:    Option<String>,
  pub location:    Option<String>,
  pub event_date:  NaiveDate,
  pub event_time:  NaiveTime,
  pub organizer:   Option<String>,
  #[serde(default)]
  pub capacity:    Option<i64>,
}

impl NewEvent {
  pub fn validate(&self) -> Result<(), Error> {
    if self.title.trim().is_empty() {
      return Err(Error::Invalid("title is required".into()));
    }
    if matches!(self.capacity, Some(c) if c < 1) {
      return Err(Error::Invalid("capacity must be positive".into()));
    }
    Ok(())
  }
}

/// Filters for `list_events`; both match case-insensitively as substrings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
  /// `"all"` is treated the same as no filter.
  pub category: Option<String>,
  /// Matched against title and description.
  pub search:   Option<String>,
}

// ─── Registrations ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
  Registered,
  Cancelled,
  Waitlist,
}

impl RegistrationStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Registered => "registered",
      Self::Cancelled => "cancelled",
      Self::Waitlist => "waitlist",
    }
  }
}

impl fmt::Display for RegistrationStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for RegistrationStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "registered" => Ok(Self::Registered),
      "cancelled" => Ok(Self::Cancelled),
      "waitlist" => Ok(Self::Waitlist),
      other => Err(Error::UnknownStatus(other.to_owned())),
    }
  }
}

/// A row of `event_registrations`. Also the row image shape carried by change
/// events for that table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
  pub id:                i64,
  pub user_id:           i64,
  pub event_id:          i64,
  pub registration_date: DateTime<Utc>,
  pub status:            RegistrationStatus,
  pub email_sent:        bool,
  pub email_sent_at:     Option<DateTime<Utc>>,
  pub notes:             Option<String>,
  pub created_at:        DateTime<Utc>,
  pub updated_at:        DateTime<Utc>,
}

/// Input to `register`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRegistration {
  pub user_id:  i64,
  pub event_id: i64,
  #[serde(default)]
  pub notes:    Option<String>,
}

/// One row of the `registration_details` view: a registration joined with its
/// user and event, as read by the notification path and export consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDetails {
  pub registration_id:   i64,
  pub status:            RegistrationStatus,
  pub registration_date: DateTime<Utc>,
  pub email_sent:        bool,
  pub email_sent_at:     Option<DateTime<Utc>>,
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
  pub event_date:        NaiveDate,
  pub event_time:        NaiveTime,
  pub organizer:         Option<String>,
}

impl RegistrationDetails {
  pub fn recipient_name(&self) -> &str {
    self.full_name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.username)
  }
}

/// An active registration as shown on a user's "my registrations" page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegistration {
  pub event:             Event,
  pub registration_id:   i64,
  pub registration_date: DateTime<Utc>,
  pub notes:             Option<String>,
}

// ─── Legacy backfill ─────────────────────────────────────────────────────────

/// Outcome of copying `user_event_registrations` into `event_registrations`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
  pub copied:             u64,
  pub skipped_null_event: u64,
  pub skipped_orphaned:   u64,
  pub skipped_duplicate:  u64,
  /// Rows whose registration date could not be read.
  pub skipped_malformed:  u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn new_user(email: &str, password: &str) -> NewUser {
    NewUser {
      username:  "ada".into(),
      email:     email.into(),
      password:  password.into(),
      full_name: None,
    }
  }

  #[test]
  fn status_round_trips_through_str() {
    for status in [
      RegistrationStatus::Registered,
      RegistrationStatus::Cancelled,
      RegistrationStatus::Waitlist,
    ] {
      assert_eq!(status.as_str().parse::<RegistrationStatus>().unwrap(), status);
    }
    assert!("pending".parse::<RegistrationStatus>().is_err());
  }

  #[test]
  fn user_validation() {
    assert!(new_user("ada@example.com", "correct horse").validate().is_ok());
    assert!(new_user("not-an-email", "correct horse").validate().is_err());
    assert!(new_user("ada@localhost", "correct horse").validate().is_err());
    assert!(new_user("ada@example.com", "short").validate().is_err());
  }

  #[test]
  fn password_hash_is_never_serialised() {
    let user = User {
      id:            1,
      username:      "ada".into(),
      email:         "ada@example.com".into(),
      password_hash: "$argon2id$secret".into(),
      full_name:     None,
      created_at:    Utc::now(),
      updated_at:    Utc::now(),
    };
    let json = serde_json::to_string(&user).unwrap();
    assert!(!json.contains("argon2"));
    assert_eq!(user.display_name(), "ada");
  }
}
