//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Store failures are mapped by their [`ErrorKind`]; infrastructure detail is
//! logged, never returned to the caller.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use rsvp_core::{Classify, ErrorKind};
use serde_json::json;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("temporarily unavailable: {0}")]
  Unavailable(#[source] BoxError),

  #[error("internal error: {0}")]
  Internal(#[source] BoxError),
}

/// The domain error somewhere in `err`'s source chain.
fn domain_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a rsvp_core::Error> {
  let mut current = Some(err);
  while let Some(e) = current {
    if let Some(domain) = e.downcast_ref::<rsvp_core::Error>() {
      return Some(domain);
    }
    current = e.source();
  }
  None
}

impl ApiError {
  /// Map a store (or ledger) failure onto a response class.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Classify + Send + Sync + 'static,
  {
    let domain = domain_error(&err);
    if let Some(e) = domain
      && matches!(
        e,
        rsvp_core::Error::UnknownUser(_)
          | rsvp_core::Error::UnknownEvent(_)
          | rsvp_core::Error::RegistrationNotFound(_)
      )
    {
      return Self::NotFound(e.to_string());
    }
    let message = domain.map_or_else(|| err.to_string(), ToString::to_string);

    match err.kind() {
      ErrorKind::Validation => Self::BadRequest(message),
      ErrorKind::Conflict => Self::Conflict(message),
      ErrorKind::TransientInfrastructure => Self::Unavailable(Box::new(err)),
      ErrorKind::PermanentDelivery | ErrorKind::Corruption => Self::Internal(Box::new(err)),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Unavailable(e) => {
        tracing::warn!(error = %e, "request failed on unavailable infrastructure");
        (StatusCode::SERVICE_UNAVAILABLE, "service temporarily unavailable".to_owned())
      }
      ApiError::Internal(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
