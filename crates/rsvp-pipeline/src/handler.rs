//! The seam between the delivery coordinator and a side effect.

use std::future::Future;

use rsvp_core::{
  change::{ChangeEvent, SourceTable},
  delivery::{Delivered, DeliveryError},
};

/// How a consumer group remembers its progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
  /// Durable cursor and processed keys in the delivery ledger.
  Persistent,
  /// Starts from position zero on every run and keeps no ledger state.
  /// For sinks that are rebuilt in memory on startup.
  Ephemeral,
}

/// One consumer group's side effect.
///
/// `handle` may be called more than once for the same change and must be
/// idempotent. It re-reads whatever state it acts on rather than trusting
/// the change payload.
pub trait ChangeHandler: Send + Sync + 'static {
  /// The consumer-group name: key of its cursor, processed keys, and dead
  /// letters.
  fn consumer(&self) -> &str;

  /// The source tables this consumer subscribes to.
  fn tables(&self) -> &[SourceTable];

  fn handle<'a>(
    &'a self,
    change: &'a ChangeEvent,
  ) -> impl Future<Output = Result<Delivered, DeliveryError>> + Send + 'a;

  /// Called after `change` has been dead-lettered.
  fn dead_lettered(&self, _change: &ChangeEvent) {}
}
