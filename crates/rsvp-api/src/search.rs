//! Handler for `GET /search`, served from the in-process projection.

use axum::{
  Json,
  extract::{Query, State},
};
use rsvp_search::SearchHit;
use serde::Deserialize;

use crate::ApiState;

#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
  /// Free text; empty lists every indexed event.
  pub q:     Option<String>,
  /// Clamped to the configured maximum.
  pub limit: Option<usize>,
}

/// `GET /search[?q=...][&limit=...]`
pub async fn handler<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<SearchParams>,
) -> Json<Vec<SearchHit>> {
  let limit = state.limits.clamp(params.limit);
  Json(state.search.query(params.q.as_deref().unwrap_or_default(), limit))
}
