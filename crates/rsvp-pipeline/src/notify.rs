//! The `notify` consumer: registration confirmations and cancellation
//! notices.
//!
//! The change payload only says what *might* be owed. Before every send the
//! handler re-reads the registration and acts on the current row, so a
//! cancellation that lands before a pending confirmation suppresses it, and
//! a redelivered insert whose confirmation already went out does nothing.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rsvp_core::{
  change::{ChangeEvent, Operation, SourceTable},
  delivery::{Delivered, DeliveryError},
  model::{Registration, RegistrationDetails, RegistrationStatus},
  store::{ChangeLog, RegistrationStore},
};

use crate::{
  handler::ChangeHandler,
  notifier::{Notice, Notifier},
  tracker::DeliveryTracker,
};

pub const CONSUMER: &str = "notify";

const TABLES: &[SourceTable] = &[SourceTable::EventRegistrations];

/// What a registration change asks of the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
  Confirm,
  NoticeCancellation,
  Nothing(&'static str),
}

pub(crate) fn intent(
  operation: Operation,
  before: Option<&Registration>,
  after: Option<&Registration>,
) -> Intent {
  match (operation, before, after) {
    (Operation::Insert, _, Some(after)) => match after.status {
      RegistrationStatus::Registered if after.email_sent => Intent::Nothing("already confirmed"),
      RegistrationStatus::Registered => Intent::Confirm,
      _ => Intent::Nothing("not registered"),
    },
    (Operation::Update, Some(before), Some(after)) if before.status != after.status => {
      match (before.status, after.status) {
        (_, RegistrationStatus::Registered) if after.email_sent => {
          Intent::Nothing("already confirmed")
        }
        (_, RegistrationStatus::Registered) => Intent::Confirm,
        (RegistrationStatus::Registered, RegistrationStatus::Cancelled) => {
          Intent::NoticeCancellation
        }
        _ => Intent::Nothing("status change needs no notice"),
      }
    }
    (Operation::Update, ..) => Intent::Nothing("no status change"),
    (Operation::Delete, ..) => Intent::Nothing("row deleted"),
    _ => Intent::Nothing("missing row image"),
  }
}

/// Sends confirmations and cancellation notices for registration changes.
pub struct NotifyHandler<S, N> {
  store:        Arc<S>,
  notifier:     Arc<N>,
  tracker:      Arc<DeliveryTracker>,
  sink_timeout: Duration,
}

impl<S, N> NotifyHandler<S, N>
where
  S: RegistrationStore + ChangeLog,
  N: Notifier,
{
  pub fn new(
    store: Arc<S>,
    notifier: Arc<N>,
    tracker: Arc<DeliveryTracker>,
    sink_timeout: Duration,
  ) -> Self {
    Self { store, notifier, tracker, sink_timeout }
  }

  /// Re-read the registration. `Ok(None)` means it was deleted after
  /// `change`; a row missing without a logged delete is corruption.
  async fn current(&self, change: &ChangeEvent) -> Result<Option<RegistrationDetails>, DeliveryError> {
    let details = self
      .store
      .registration_details(change.row_id)
      .await
      .map_err(|e| DeliveryError::from_classified(&e))?;
    if details.is_some() {
      return Ok(details);
    }

    let deleted = self
      .store
      .has_tombstone(SourceTable::EventRegistrations, change.row_id, change.position)
      .await
      .map_err(|e| DeliveryError::from_classified(&e))?;
    if deleted {
      Ok(None)
    } else {
      Err(DeliveryError::Corruption(format!(
        "registration {} is missing and no delete was logged after position {}",
        change.row_id,
        change.position.value()
      )))
    }
  }

  async fn deliver(&self, notice: &Notice) -> Result<(), DeliveryError> {
    match tokio::time::timeout(self.sink_timeout, self.notifier.send(notice)).await {
      Ok(Ok(())) => Ok(()),
      Ok(Err(e)) => Err(DeliveryError::from_classified(&e)),
      Err(_) => Err(DeliveryError::Transient(format!(
        "notification sink timed out after {:?}",
        self.sink_timeout
      ))),
    }
  }

  async fn confirm(&self, change: &ChangeEvent) -> Result<Delivered, DeliveryError> {
    let id = change.row_id;
    // `false` when this process already sent the confirmation but the
    // write-back did not land.
    let owed = self.tracker.update(id, |d| d.confirmation_pending());

    let Some(details) = self.current(change).await? else {
      self.tracker.update(id, |d| d.confirmation_suppressed());
      return Ok(Delivered::Suppressed("registration deleted".into()));
    };
    if details.email_sent {
      self.tracker.update(id, |d| d.confirmation_sent());
      return Ok(Delivered::Suppressed("confirmation already sent".into()));
    }
    if details.status != RegistrationStatus::Registered {
      self.tracker.update(id, |d| d.confirmation_suppressed());
      return Ok(Delivered::Suppressed(format!("registration is {}", details.status)));
    }

    if owed {
      self.tracker.update(id, |d| d.confirmation_in_flight());
      if let Err(e) = self.deliver(&Notice::confirmation(&details)).await {
        self.tracker.update(id, |d| {
          d.confirmation_pending();
        });
        return Err(e);
      }
      self.tracker.update(id, |d| d.confirmation_sent());
    }

    self
      .store
      .mark_email_sent(id, Utc::now())
      .await
      .map_err(|e| DeliveryError::from_classified(&e))?;
    tracing::debug!(registration_id = id, "confirmation recorded");
    Ok(Delivered::Applied)
  }

  async fn notice_cancellation(&self, change: &ChangeEvent) -> Result<Delivered, DeliveryError> {
    let id = change.row_id;

    let Some(details) = self.current(change).await? else {
      return Ok(Delivered::Suppressed("registration deleted".into()));
    };
    if details.status != RegistrationStatus::Cancelled {
      return Ok(Delivered::Suppressed(format!("registration is {} again", details.status)));
    }

    self.tracker.update(id, |d| d.cancellation_in_flight());
    self.deliver(&Notice::cancellation(&details)).await?;
    self.tracker.update(id, |d| d.cancellation_sent());
    Ok(Delivered::Applied)
  }
}

impl<S, N> ChangeHandler for NotifyHandler<S, N>
where
  S: RegistrationStore + ChangeLog,
  N: Notifier,
{
  fn consumer(&self) -> &str { CONSUMER }

  fn tables(&self) -> &[SourceTable] { TABLES }

  async fn handle(&self, change: &ChangeEvent) -> Result<Delivered, DeliveryError> {
    if change.table != SourceTable::EventRegistrations {
      return Ok(Delivered::Skipped("not a registration".into()));
    }

    let images = change.registration_images().map_err(|e| DeliveryError::from_classified(&e))?;
    let Some((before, after)) = images else {
      return Ok(Delivered::Skipped("not a registration".into()));
    };

    match intent(change.operation, before.as_ref(), after.as_ref()) {
      Intent::Confirm => self.confirm(change).await,
      Intent::NoticeCancellation => {
        self.tracker.update(change.row_id, |d| d.confirmation_suppressed());
        self.notice_cancellation(change).await
      }
      Intent::Nothing(reason) => Ok(Delivered::Skipped(reason.into())),
    }
  }

  fn dead_lettered(&self, change: &ChangeEvent) {
    self.tracker.update(change.row_id, |d| d.notify_dead_lettered());
  }
}
