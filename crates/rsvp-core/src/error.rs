//! Error types for `rsvp-core`, and the failure taxonomy shared by every
//! layer of the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Taxonomy ────────────────────────────────────────────────────────────────

/// The class of a failure, independent of which crate raised it.
///
/// Callers branch on the kind, never on the concrete error: store errors are
/// mapped onto one of these before they reach a registration caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Bad input (unknown user, unknown event, malformed field). Rejected
  /// immediately.
  Validation,
  /// The request collides with existing state (duplicate registration, event
  /// full). Rejected via constraint.
  Conflict,
  /// Store, sink, or search engine unreachable. Retried with backoff.
  TransientInfrastructure,
  /// A side effect exhausted its retry budget.
  PermanentDelivery,
  /// Persisted data contradicts the change stream.
  Corruption,
}

impl ErrorKind {
  pub fn is_retryable(self) -> bool { matches!(self, Self::TransientInfrastructure) }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Validation => "validation",
      Self::Conflict => "conflict",
      Self::TransientInfrastructure => "transient_infrastructure",
      Self::PermanentDelivery => "permanent_delivery",
      Self::Corruption => "corruption",
    };
    f.write_str(s)
  }
}

/// Maps an error onto the shared [`ErrorKind`] taxonomy.
pub trait Classify {
  fn kind(&self) -> ErrorKind;
}

// ─── Domain errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  #[error("user not found: {0}")]
  UnknownUser(i64),

  #[error("event not found: {0}")]
  UnknownEvent(i64),

  #[error("unknown category: {0:?}")]
  UnknownCategory(String),

  #[error("registration not found: {0}")]
  RegistrationNotFound(i64),

  #[error("user {user_id} is already registered for event {event_id}")]
  AlreadyRegistered { user_id: i64, event_id: i64 },

  #[error("registration {0} is already cancelled")]
  AlreadyCancelled(i64),

  #[error("event {0} is full")]
  EventFull(i64),

  #[error("username or email already taken: {0}")]
  DuplicateUser(String),

  #[error("category already exists: {0}")]
  DuplicateCategory(String),

  #[error("invalid input: {0}")]
  Invalid(String),

  #[error("unknown registration status: {0:?}")]
  UnknownStatus(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::UnknownUser(_)
      | Self::UnknownEvent(_)
      | Self::UnknownCategory(_)
      | Self::RegistrationNotFound(_)
      | Self::Invalid(_) => ErrorKind::Validation,
      Self::AlreadyRegistered { .. }
      | Self::AlreadyCancelled(_)
      | Self::EventFull(_)
      | Self::DuplicateUser(_)
      | Self::DuplicateCategory(_) => ErrorKind::Conflict,
      Self::UnknownStatus(_) | Self::Serialization(_) => ErrorKind::Corruption,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn register_failures_are_classified() {
    assert_eq!(Error::UnknownUser(1).kind(), ErrorKind::Validation);
    assert_eq!(Error::UnknownEvent(1).kind(), ErrorKind::Validation);
    assert_eq!(
      Error::AlreadyRegistered { user_id: 1, event_id: 2 }.kind(),
      ErrorKind::Conflict
    );
    assert_eq!(Error::EventFull(2).kind(), ErrorKind::Conflict);
  }

  #[test]
  fn only_transient_is_retryable() {
    assert!(ErrorKind::TransientInfrastructure.is_retryable());
    assert!(!ErrorKind::Conflict.is_retryable());
    assert!(!ErrorKind::Corruption.is_retryable());
  }
}
