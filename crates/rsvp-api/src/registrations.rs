//! Handlers for `/registrations` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/registrations` | Body: [`NewRegistration`]; 409 when duplicate or full |
//! | `GET`  | `/registrations/{id}` | Joined with user and event |
//! | `POST` | `/registrations/{id}/cancel` | 409 when already cancelled |
//!
//! A `201` from `POST /registrations` means the row (and its change record)
//! committed. The confirmation email is sent later by the pipeline.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use rsvp_core::{
  model::{NewRegistration, Registration, RegistrationDetails},
  store::RegistrationStore,
};

use crate::{ApiState, error::ApiError};

/// `POST /registrations`
pub async fn create<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Json(body): Json<NewRegistration>,
) -> Result<impl IntoResponse, ApiError> {
  let registration = state.store.register(body).await.map_err(ApiError::store)?;
  tracing::debug!(
    registration_id = registration.id,
    user_id = registration.user_id,
    event_id = registration.event_id,
    "registration committed"
  );
  Ok((StatusCode::CREATED, Json(registration)))
}

/// `GET /registrations/{id}`
pub async fn get_one<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<RegistrationDetails>, ApiError> {
  let details = state
    .store
    .registration_details(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("registration {id} not found")))?;
  Ok(Json(details))
}

/// `POST /registrations/{id}/cancel`
pub async fn cancel<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Registration>, ApiError> {
  let registration = state.store.cancel(id).await.map_err(ApiError::store)?;
  Ok(Json(registration))
}
