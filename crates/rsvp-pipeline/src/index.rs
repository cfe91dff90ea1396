//! Search-index consumers: keep a [`SearchIndex`] in step with events and
//! their attendance.

use std::sync::Arc;

use rsvp_core::{
  change::{ChangeEvent, Operation, SourceTable},
  delivery::{Delivered, DeliveryError},
  model::RegistrationStatus,
  search::{EventDocument, SearchIndex},
};

use crate::{handler::ChangeHandler, tracker::DeliveryTracker};

/// Consumer name of the in-process projection.
pub const PROJECTION_CONSUMER: &str = "search-projection";
/// Consumer name of the remote search mirror.
pub const MIRROR_CONSUMER: &str = "search-mirror";

/// Applies event and registration changes to a search index.
pub struct IndexHandler<I> {
  consumer: String,
  index:    Arc<I>,
  tracker:  Option<Arc<DeliveryTracker>>,
}

impl<I: SearchIndex> IndexHandler<I> {
  pub fn new(consumer: impl Into<String>, index: Arc<I>) -> Self {
    Self { consumer: consumer.into(), index, tracker: None }
  }

  /// Report the index concern of registrations to `tracker`.
  pub fn with_tracker(mut self, tracker: Arc<DeliveryTracker>) -> Self {
    self.tracker = Some(tracker);
    self
  }

  fn track(&self, registration_id: i64, f: impl FnOnce(&mut rsvp_core::delivery::RegistrationDelivery)) {
    if let Some(tracker) = &self.tracker {
      tracker.update(registration_id, f);
    }
  }

  async fn apply_event(&self, change: &ChangeEvent) -> Result<Delivered, DeliveryError> {
    match change.operation {
      Operation::Insert | Operation::Update => {
        let event = change
          .event_after()
          .map_err(|e| DeliveryError::from_classified(&e))?
          .ok_or_else(|| {
            DeliveryError::Corruption(format!("event change at {} has no after image", change.position))
          })?;
        self
          .index
          .upsert(EventDocument::from(&event))
          .await
          .map_err(|e| DeliveryError::from_classified(&e))?;
      }
      Operation::Delete => {
        self
          .index
          .remove(change.row_id)
          .await
          .map_err(|e| DeliveryError::from_classified(&e))?;
      }
    }
    Ok(Delivered::Applied)
  }

  async fn apply_registration(&self, change: &ChangeEvent) -> Result<Delivered, DeliveryError> {
    let (before, after) = change
      .registration_images()
      .map_err(|e| DeliveryError::from_classified(&e))?
      .unwrap_or_default();

    // Deletes carry only the before image; a deleted row never attends.
    let (registration, active) = match (change.operation, after, before) {
      (Operation::Delete, _, Some(before)) => (before, false),
      (_, Some(after), _) => {
        let active = after.status == RegistrationStatus::Registered;
        (after, active)
      }
      _ => {
        return Err(DeliveryError::Corruption(format!(
          "registration change at {} has no usable row image",
          change.position
        )));
      }
    };

    self.track(registration.id, |d| d.index_in_flight());
    let applied = self.index.set_attendance(registration.event_id, registration.id, active).await;
    if let Err(e) = applied {
      self.track(registration.id, |d| d.index_stale());
      return Err(DeliveryError::from_classified(&e));
    }
    self.track(registration.id, |d| d.index_fresh());
    Ok(Delivered::Applied)
  }
}

impl<I: SearchIndex> ChangeHandler for IndexHandler<I> {
  fn consumer(&self) -> &str { &self.consumer }

  fn tables(&self) -> &[SourceTable] { &SourceTable::ALL }

  async fn handle(&self, change: &ChangeEvent) -> Result<Delivered, DeliveryError> {
    match change.table {
      SourceTable::Events => self.apply_event(change).await,
      SourceTable::EventRegistrations => self.apply_registration(change).await,
    }
  }

  fn dead_lettered(&self, change: &ChangeEvent) {
    if change.table == SourceTable::EventRegistrations {
      self.track(change.row_id, |d| d.index_failed());
    }
  }
}
