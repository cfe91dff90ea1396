//! SQLite backend for the rsvp registration store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Mutations of `events` and
//! `event_registrations` are captured by triggers into `change_log` inside the
//! writing transaction, so a committed row always has its change record.

mod encode;
mod ledger;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
