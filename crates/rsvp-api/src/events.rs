//! Handlers for `/events` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/events` | Optional `?category=` (`all` = any) and `?search=` |
//! | `POST`   | `/events` | Body: [`NewEvent`]; the category must exist |
//! | `GET`    | `/events/{id}` | 404 if not found |
//! | `PUT`    | `/events/{id}` | Replaces every editable field |
//! | `DELETE` | `/events/{id}` | Cascades to the event's registrations |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use rsvp_core::{
  model::{Event, EventQuery, NewEvent},
  store::RegistrationStore,
};

use crate::{ApiState, error::ApiError};

// ─── List ────────────────────────────────────────────────────────────────────

/// `GET /events[?category=<name>][&search=<text>]`
pub async fn list<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
  let events = state.store.list_events(&query).await.map_err(ApiError::store)?;
  Ok(Json(events))
}

// ─── Create ──────────────────────────────────────────────────────────────────

/// `POST /events`
pub async fn create<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Json(body): Json<NewEvent>,
) -> Result<impl IntoResponse, ApiError> {
  let event = state.store.create_event(body).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(event)))
}

// ─── Get / update / delete ───────────────────────────────────────────────────

/// `GET /events/{id}`
pub async fn get_one<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Event>, ApiError> {
  let event = state
    .store
    .get_event(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("event {id} not found")))?;
  Ok(Json(event))
}

/// `PUT /events/{id}`
pub async fn update<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<i64>,
  Json(body): Json<NewEvent>,
) -> Result<Json<Event>, ApiError> {
  let event = state.store.update_event(id, body).await.map_err(ApiError::store)?;
  Ok(Json(event))
}

/// `DELETE /events/{id}`
pub async fn delete_one<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
  state.store.delete_event(id).await.map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}
