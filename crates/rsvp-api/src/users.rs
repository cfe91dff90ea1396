//! Handlers for `/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/users` | Body: [`NewUser`]; 409 on a taken username or email |
//! | `GET`  | `/users/{id}` | 404 if not found |
//! | `GET`  | `/users/{id}/registrations` | Active registrations, by event date |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use rsvp_core::{
  model::{NewUser, User, UserRegistration},
  store::RegistrationStore,
};

use crate::{ApiState, error::ApiError};

// ─── Create ──────────────────────────────────────────────────────────────────

/// `POST /users`
pub async fn create<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Json(body): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
  let user = state.store.create_user(body).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(user)))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

async fn find<S: RegistrationStore>(state: &ApiState<S>, id: i64) -> Result<User, ApiError> {
  state
    .store
    .get_user(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))
}

/// `GET /users/{id}`
pub async fn get_one<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
  Ok(Json(find(&state, id).await?))
}

// ─── Registrations ───────────────────────────────────────────────────────────

/// `GET /users/{id}/registrations`
pub async fn registrations<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Vec<UserRegistration>>, ApiError> {
  find(&state, id).await?;
  let rows = state.store.user_registrations(id).await.map_err(ApiError::store)?;
  Ok(Json(rows))
}
