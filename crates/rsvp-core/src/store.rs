//! Storage traits.
//!
//! [`RegistrationStore`] owns users, categories, events, and registrations.
//! [`ChangeLog`] exposes the committed mutations of the captured tables.
//! [`DeliveryLedger`] holds delivery-tracking state: consumer cursors,
//! processed keys, and dead letters. Backends (e.g. `rsvp-store-sqlite`)
//! usually implement all three on one type so that a write and its change
//! record commit together.
//!
//! All methods return `Send` futures so implementations can be shared across
//! tasks in a multi-threaded tokio runtime.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  change::{ChangeEvent, DedupKey, Position, SourceTable},
  delivery::DeadLetter,
  error::Classify,
  model::{
    BackfillReport, Category, Event, EventQuery, NewEvent, NewRegistration, NewUser,
    Registration, RegistrationDetails, User, UserRegistration,
  },
};

// ─── Registration store ──────────────────────────────────────────────────────

pub trait RegistrationStore: Send + Sync + 'static {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Persist a user with an argon2-hashed password. Fails with
  /// `DuplicateUser` when the username or email is taken.
  fn create_user(&self, input: NewUser)
  -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user(&self, id: i64) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// Verify a password; `None` when the username is unknown or the password
  /// does not match.
  fn authenticate<'a>(
    &'a self,
    username: &'a str,
    password: &'a str,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + 'a;

  // ── Categories ────────────────────────────────────────────────────────

  fn add_category(&self, name: String)
  -> impl Future<Output = Result<Category, Self::Error>> + Send + '_;

  /// All categories ordered by name.
  fn list_categories(&self) -> impl Future<Output = Result<Vec<Category>, Self::Error>> + Send + '_;

  // ── Events ────────────────────────────────────────────────────────────

  /// Create an event. A category label must name an existing category.
  fn create_event(&self, input: NewEvent)
  -> impl Future<Output = Result<Event, Self::Error>> + Send + '_;

  fn get_event(&self, id: i64) -> impl Future<Output = Result<Option<Event>, Self::Error>> + Send + '_;

  /// Events matching `query`, ordered by date then time.
  fn list_events<'a>(
    &'a self,
    query: &'a EventQuery,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

  fn update_event(
    &self,
    id: i64,
    input: NewEvent,
  ) -> impl Future<Output = Result<Event, Self::Error>> + Send + '_;

  /// Delete an event and, by cascade, its registrations.
  fn delete_event(&self, id: i64) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Registrations ─────────────────────────────────────────────────────

  /// Register a user for an event.
  ///
  /// Fails with `UnknownUser`, `UnknownEvent`, `EventFull`, or
  /// `AlreadyRegistered`. The (user, event) uniqueness constraint decides
  /// concurrent duplicates; a cancelled registration is reactivated.
  fn register(
    &self,
    input: NewRegistration,
  ) -> impl Future<Output = Result<Registration, Self::Error>> + Send + '_;

  /// Cancel a registration. Fails with `RegistrationNotFound` or
  /// `AlreadyCancelled`.
  fn cancel(
    &self,
    registration_id: i64,
  ) -> impl Future<Output = Result<Registration, Self::Error>> + Send + '_;

  /// Record that the confirmation for `registration_id` went out at `at`.
  /// Idempotent: an already-marked row keeps its original timestamp.
  fn mark_email_sent(
    &self,
    registration_id: i64,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_registration(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Registration>, Self::Error>> + Send + '_;

  /// Read a row of the `registration_details` view.
  fn registration_details(
    &self,
    registration_id: i64,
  ) -> impl Future<Output = Result<Option<RegistrationDetails>, Self::Error>> + Send + '_;

  /// A user's `registered` registrations, ordered by event date.
  fn user_registrations(
    &self,
    user_id: i64,
  ) -> impl Future<Output = Result<Vec<UserRegistration>, Self::Error>> + Send + '_;

  /// Copy the legacy `user_event_registrations` rows into the canonical
  /// table. Safe to run more than once.
  fn backfill_legacy_registrations(
    &self,
  ) -> impl Future<Output = Result<BackfillReport, Self::Error>> + Send + '_;
}

// ─── Change log ──────────────────────────────────────────────────────────────

pub trait ChangeLog: Send + Sync + 'static {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  /// Up to `limit` changes with a position strictly greater than `after`,
  /// restricted to `tables`, in position order.
  fn read_changes<'a>(
    &'a self,
    after: Position,
    tables: &'a [SourceTable],
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ChangeEvent>, Self::Error>> + Send + 'a;

  /// Whether a delete of the row was logged after `after`, the tombstone
  /// that explains a row missing from the store.
  fn has_tombstone(
    &self,
    table: SourceTable,
    row_id: i64,
    after: Position,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The most recent position, or `Position::ZERO` for an empty log.
  fn head(&self) -> impl Future<Output = Result<Position, Self::Error>> + Send + '_;
}

// ─── Delivery ledger ─────────────────────────────────────────────────────────

pub trait DeliveryLedger: Send + Sync + 'static {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  /// The durable cursor of `consumer`; `Position::ZERO` if it never committed.
  fn load_cursor<'a>(
    &'a self,
    consumer: &'a str,
  ) -> impl Future<Output = Result<Position, Self::Error>> + Send + 'a;

  /// Persist the cursor. Never moves a cursor backwards.
  fn save_cursor<'a>(
    &'a self,
    consumer: &'a str,
    position: Position,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn is_processed<'a>(
    &'a self,
    consumer: &'a str,
    key: DedupKey,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Record `key` as retired for `consumer`. Idempotent.
  fn mark_processed<'a>(
    &'a self,
    consumer: &'a str,
    key: DedupKey,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Store a dead letter and retire its change in one transaction.
  fn record_dead_letter(
    &self,
    letter: DeadLetter,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_dead_letters(
    &self,
    unresolved_only: bool,
  ) -> impl Future<Output = Result<Vec<DeadLetter>, Self::Error>> + Send + '_;

  /// Mark a dead letter as handled. Returns `false` if it does not exist or
  /// was already resolved.
  fn resolve_dead_letter(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
