//! Delivery tracking types: the per-registration side-effect state machine,
//! handler outcomes, and dead-letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  change::{ChangeEvent, Operation, Position, SourceTable},
  error::{Classify, ErrorKind},
};

// ─── State machine ───────────────────────────────────────────────────────────

/// The notification concern of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyState {
  /// A confirmation is owed and has not been attempted.
  Pending,
  NotifyInFlight,
  /// Terminal for the confirmation: `email_sent` is persisted.
  Notified,
  /// The registration was cancelled before its confirmation fired.
  Suppressed,
  CancellationInFlight,
  CancellationSent,
  DeadLettered,
}

/// The search-index concern of a registration or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
  IndexStale,
  IndexInFlight,
  IndexFresh,
  IndexFailed,
}

/// Both delivery concerns of one row. Each concern is `None` until the first
/// change that involves it arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDelivery {
  pub notify: Option<NotifyState>,
  pub index:  Option<IndexState>,
}

impl RegistrationDelivery {
  /// Owe a confirmation. Returns `false` (and changes nothing) once the row
  /// has reached `Notified`.
  pub fn confirmation_pending(&mut self) -> bool {
    if self.notify == Some(NotifyState::Notified) {
      return false;
    }
    self.notify = Some(NotifyState::Pending);
    true
  }

  pub fn confirmation_in_flight(&mut self) { self.notify = Some(NotifyState::NotifyInFlight); }

  pub fn confirmation_sent(&mut self) { self.notify = Some(NotifyState::Notified); }

  /// A confirmation that never fired is suppressed; one already sent stays
  /// `Notified`.
  pub fn confirmation_suppressed(&mut self) {
    if self.notify != Some(NotifyState::Notified) {
      self.notify = Some(NotifyState::Suppressed);
    }
  }

  /// Start a cancellation notice. Any confirmation still pending or in flight
  /// is abandoned.
  pub fn cancellation_in_flight(&mut self) {
    self.notify = Some(NotifyState::CancellationInFlight);
  }

  pub fn cancellation_sent(&mut self) { self.notify = Some(NotifyState::CancellationSent); }

  pub fn notify_dead_lettered(&mut self) { self.notify = Some(NotifyState::DeadLettered); }

  pub fn index_stale(&mut self) { self.index = Some(IndexState::IndexStale); }

  pub fn index_in_flight(&mut self) { self.index = Some(IndexState::IndexInFlight); }

  pub fn index_fresh(&mut self) { self.index = Some(IndexState::IndexFresh); }

  pub fn index_failed(&mut self) { self.index = Some(IndexState::IndexFailed); }

  /// No concern has work pending or in flight.
  pub fn is_settled(&self) -> bool {
    let notify = matches!(
      self.notify,
      None
        | Some(
          NotifyState::Notified
            | NotifyState::Suppressed
            | NotifyState::CancellationSent
            | NotifyState::DeadLettered
        )
    );
    let index = matches!(self.index, None | Some(IndexState::IndexFresh | IndexState::IndexFailed));
    notify && index
  }
}

// ─── Handler results ─────────────────────────────────────────────────────────

/// What a handler did with a change. Every variant retires the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Delivered {
  /// The side effect ran.
  Applied,
  /// The change required no side effect for this consumer.
  Skipped(String),
  /// The idempotency guard found the side effect already done or obsolete.
  Suppressed(String),
}

/// Why a handler could not retire a change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
  /// Retry with backoff.
  #[error("transient: {0}")]
  Transient(String),
  /// Retrying cannot help; dead-letter immediately.
  #[error("permanent: {0}")]
  Permanent(String),
  /// The change contradicts the store; log, skip, and flag for reconciliation.
  #[error("corruption: {0}")]
  Corruption(String),
}

impl DeliveryError {
  /// Map any classified error onto the delivery outcome it demands.
  pub fn from_classified<E: Classify + std::fmt::Display>(err: &E) -> Self {
    match err.kind() {
      ErrorKind::TransientInfrastructure => Self::Transient(err.to_string()),
      ErrorKind::Corruption => Self::Corruption(err.to_string()),
      ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::PermanentDelivery => {
        Self::Permanent(err.to_string())
      }
    }
  }
}

impl Classify for DeliveryError {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::Transient(_) => ErrorKind::TransientInfrastructure,
      Self::Permanent(_) => ErrorKind::PermanentDelivery,
      Self::Corruption(_) => ErrorKind::Corruption,
    }
  }
}

// ─── Dead letters ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
  /// Transient failures outlasted the retry budget.
  Exhausted,
  /// The handler reported a failure retrying cannot fix.
  Permanent,
  /// Flagged for reconciliation: the change references state the store no
  /// longer has and no tombstone explains.
  Corruption,
}

impl DeadLetterReason {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Exhausted => "exhausted",
      Self::Permanent => "permanent",
      Self::Corruption => "corruption",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "exhausted" => Some(Self::Exhausted),
      "permanent" => Some(Self::Permanent),
      "corruption" => Some(Self::Corruption),
      _ => None,
    }
  }
}

/// A side effect held for operator remediation. It no longer blocks its
/// consumer's cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
  pub dead_letter_id: Uuid,
  pub consumer:       String,
  pub position:       Position,
  pub table:          SourceTable,
  pub row_id:         i64,
  pub operation:      Operation,
  pub reason:         DeadLetterReason,
  pub attempts:       u32,
  pub last_error:     String,
  pub change:         ChangeEvent,
  pub recorded_at:    DateTime<Utc>,
  pub resolved_at:    Option<DateTime<Utc>>,
}

impl DeadLetter {
  pub fn new(
    consumer: &str,
    change: &ChangeEvent,
    reason: DeadLetterReason,
    attempts: u32,
    last_error: impl Into<String>,
  ) -> Self {
    Self {
      dead_letter_id: Uuid::new_v4(),
      consumer: consumer.to_owned(),
      position: change.position,
      table: change.table,
      row_id: change.row_id,
      operation: change.operation,
      reason,
      attempts,
      last_error: last_error.into(),
      change: change.clone(),
      recorded_at: Utc::now(),
      resolved_at: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn notified_is_terminal_for_confirmation() {
    let mut d = RegistrationDelivery::default();
    assert!(d.confirmation_pending());
    d.confirmation_in_flight();
    d.confirmation_sent();
    assert!(!d.confirmation_pending());
    assert_eq!(d.notify, Some(NotifyState::Notified));

    d.confirmation_suppressed();
    assert_eq!(d.notify, Some(NotifyState::Notified));
  }

  #[test]
  fn cancellation_replaces_pending_confirmation() {
    let mut d = RegistrationDelivery::default();
    d.confirmation_pending();
    d.confirmation_suppressed();
    assert_eq!(d.notify, Some(NotifyState::Suppressed));
    d.cancellation_in_flight();
    d.cancellation_sent();
    assert_eq!(d.notify, Some(NotifyState::CancellationSent));
  }

  #[test]
  fn index_concern_is_independent() {
    let mut d = RegistrationDelivery::default();
    d.confirmation_pending();
    d.index_stale();
    d.index_in_flight();
    d.index_fresh();
    assert_eq!(d.notify, Some(NotifyState::Pending));
    assert_eq!(d.index, Some(IndexState::IndexFresh));
  }

  #[test]
  fn delivery_error_from_kind() {
    let err = crate::Error::UnknownEvent(3);
    assert!(matches!(DeliveryError::from_classified(&err), DeliveryError::Permanent(_)));
    assert_eq!(DeliveryError::Transient("x".into()).kind(), ErrorKind::TransientInfrastructure);
  }
}
