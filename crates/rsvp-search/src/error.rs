//! Error type for `rsvp-search`.

use rsvp_core::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("search engine request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("search engine returned {status}: {body}")]
  Status { status: u16, body: String },
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::Http(e) if e.is_builder() || e.is_decode() => ErrorKind::PermanentDelivery,
      Self::Http(_) => ErrorKind::TransientInfrastructure,
      Self::Status { status, .. } if *status == 429 || *status >= 500 => {
        ErrorKind::TransientInfrastructure
      }
      Self::Status { .. } => ErrorKind::PermanentDelivery,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
