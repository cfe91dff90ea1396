//! JSON REST API for rsvp.
//!
//! Exposes an axum [`Router`] over any store implementing
//! [`RegistrationStore`] and [`DeliveryLedger`], plus the in-process
//! [`SearchProjection`]. Registration requests return as soon as the store
//! commits; confirmations and index updates follow through the pipeline.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", rsvp_api::api_router(store.clone(), projection.clone(), limits))
//! ```

pub mod categories;
pub mod dead_letters;
pub mod error;
pub mod events;
pub mod registrations;
pub mod search;
pub mod users;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use rsvp_core::store::{DeliveryLedger, RegistrationStore};
use rsvp_search::{SearchLimits, SearchProjection};

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct ApiState<S> {
  pub store:  Arc<S>,
  pub search: Arc<SearchProjection>,
  pub limits: SearchLimits,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), search: Arc::clone(&self.search), limits: self.limits }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, search: Arc<SearchProjection>, limits: SearchLimits) -> Router<()>
where
  S: RegistrationStore + DeliveryLedger,
{
  Router::new()
    // Users
    .route("/users", post(users::create::<S>))
    .route("/users/{id}", get(users::get_one::<S>))
    .route("/users/{id}/registrations", get(users::registrations::<S>))
    // Categories
    .route("/categories", get(categories::list::<S>).post(categories::create::<S>))
    // Events
    .route("/events", get(events::list::<S>).post(events::create::<S>))
    .route(
      "/events/{id}",
      get(events::get_one::<S>).put(events::update::<S>).delete(events::delete_one::<S>),
    )
    // Registrations
    .route("/registrations", post(registrations::create::<S>))
    .route("/registrations/{id}", get(registrations::get_one::<S>))
    .route("/registrations/{id}/cancel", post(registrations::cancel::<S>))
    // Search
    .route("/search", get(search::handler::<S>))
    // Dead letters
    .route("/dead-letters", get(dead_letters::list::<S>))
    .route("/dead-letters/{id}/resolve", post(dead_letters::resolve::<S>))
    .with_state(ApiState { store, search, limits })
}

#[cfg(test)]
mod tests;
