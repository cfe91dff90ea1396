//! Core types and trait definitions for the rsvp registration pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod change;
pub mod delivery;
pub mod error;
pub mod model;
pub mod search;
pub mod store;

pub use error::{Classify, Error, ErrorKind, Result};
