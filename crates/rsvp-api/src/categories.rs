//! Handlers for `/categories`.

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use rsvp_core::{model::Category, store::RegistrationStore};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

/// `GET /categories`
pub async fn list<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
) -> Result<Json<Vec<Category>>, ApiError> {
  let categories = state.store.list_categories().await.map_err(ApiError::store)?;
  Ok(Json(categories))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name: String,
}

/// `POST /categories`: body: `{"name":"Music"}`
pub async fn create<S: RegistrationStore>(
  State(state): State<ApiState<S>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let category = state.store.add_category(body.name).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(category)))
}
