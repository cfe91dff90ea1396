//! Handlers for `/dead-letters`: the operator's view of deliveries that
//! gave up.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use rsvp_core::{delivery::DeadLetter, store::DeliveryLedger};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default = "unresolved_default")]
  pub unresolved: bool,
}

fn unresolved_default() -> bool { true }

/// `GET /dead-letters[?unresolved=false]`
pub async fn list<S: DeliveryLedger>(
  State(state): State<ApiState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<DeadLetter>>, ApiError> {
  let letters = state.store.list_dead_letters(params.unresolved).await.map_err(ApiError::store)?;
  Ok(Json(letters))
}

/// `POST /dead-letters/{id}/resolve`
pub async fn resolve<S: DeliveryLedger>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  if state.store.resolve_dead_letter(id).await.map_err(ApiError::store)? {
    tracing::info!(dead_letter_id = %id, "dead letter resolved");
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("no unresolved dead letter {id}")))
  }
}
