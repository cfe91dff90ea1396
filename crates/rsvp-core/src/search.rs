//! The write side of a search index fed from the change stream.

use std::future::Future;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{error::Classify, model::Event};

/// The searchable fields of an event, denormalised from the `events` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDocument {
  pub event_id:    i64,
  pub title:       String,
  pub description: Option<String>,
  pub category:    Option<String>,
  pub location:    Option<String>,
  pub event_date:  NaiveDate,
  pub event_time:  NaiveTime,
  pub organizer:   Option<String>,
}

impl From<&Event> for EventDocument {
  fn from(e: &Event) -> Self {
    Self {
      event_id:    e.id,
      title:       e.title.clone(),
      description: e.description.clone(),
      category:    e.category.clone(),
      location:    e.location.clone(),
      event_date:  e.event_date,
      event_time:  e.event_time,
      organizer:   e.organizer.clone(),
    }
  }
}

/// A sink that keeps a search index in step with the change stream.
///
/// Every operation must be idempotent: the stream is delivered at least once
/// and a rebuild replays it from the beginning.
pub trait SearchIndex: Send + Sync + 'static {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  /// Insert or replace the document for `event_id`.
  fn upsert(
    &self,
    document: EventDocument,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Drop the document for `event_id` along with its attendance. Removing a
  /// missing document is not an error.
  fn remove(&self, event_id: i64) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record whether `registration_id` currently counts as attending
  /// `event_id`.
  fn set_attendance(
    &self,
    event_id: i64,
    registration_id: i64,
    active: bool,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
