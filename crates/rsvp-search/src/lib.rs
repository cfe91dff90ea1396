//! Search side of the rsvp pipeline.
//!
//! [`SearchProjection`] is an in-memory, rebuildable index of events and
//! their active registrations, fed from the change stream and queried by the
//! API. [`RemoteIndex`] forwards the same writes to an external vector search
//! engine's object endpoint.

pub mod error;
pub mod projection;
pub mod remote;

pub use error::{Error, Result};
pub use projection::{SearchHit, SearchLimits, SearchProjection};
pub use remote::RemoteIndex;
