//! Error type for `rsvp-store-sqlite`.

use rsvp_core::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] rsvp_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A stored column did not decode (timestamp, date, enum label).
  #[error("column decode error: {0}")]
  Decode(String),

  #[error("password hashing error: {0}")]
  PasswordHash(String),
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::Core(e) => e.kind(),
      Self::Database(_) | Self::PasswordHash(_) => ErrorKind::TransientInfrastructure,
      Self::Json(_) | Self::Uuid(_) | Self::Decode(_) => ErrorKind::Corruption,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
