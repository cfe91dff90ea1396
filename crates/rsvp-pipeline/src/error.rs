//! Error type for `rsvp-pipeline`.

use rsvp_core::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The delivery ledger (cursor store) failed outside a retry loop.
  #[error("ledger error: {0}")]
  Ledger(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("mail relay request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("mail relay returned {status}: {body}")]
  RelayStatus { status: u16, body: String },

  #[error("smtp delivery failed: {0}")]
  Smtp(#[from] lettre::transport::smtp::Error),

  #[error("invalid mail address: {0}")]
  Address(#[from] lettre::address::AddressError),

  #[error("could not build mail message: {0}")]
  Message(#[from] lettre::error::Error),

  #[error("a delivery worker of consumer {consumer:?} panicked")]
  WorkerPanicked { consumer: String },

  #[error("consumer task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  pub(crate) fn ledger(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Ledger(Box::new(err))
  }
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::Ledger(_) => ErrorKind::TransientInfrastructure,
      Self::Http(e) if e.is_builder() => ErrorKind::PermanentDelivery,
      Self::Http(_) => ErrorKind::TransientInfrastructure,
      Self::RelayStatus { status, .. } if *status == 429 || *status >= 500 => {
        ErrorKind::TransientInfrastructure
      }
      Self::RelayStatus { .. } => ErrorKind::PermanentDelivery,
      // 5xx replies; connection, TLS, timeout and 4xx failures are retried.
      Self::Smtp(e) if e.is_permanent() => ErrorKind::PermanentDelivery,
      Self::Smtp(_) => ErrorKind::TransientInfrastructure,
      Self::Address(_) | Self::Message(_) => ErrorKind::PermanentDelivery,
      Self::WorkerPanicked { .. } | Self::Join(_) => ErrorKind::Corruption,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
