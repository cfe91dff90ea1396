//! The change-propagation pipeline.
//!
//! A [`ChangeCapture`] tails the store's change log; one
//! [`DeliveryCoordinator`] per consumer group delivers each change to a
//! [`ChangeHandler`] at least once, with deduplication, per-row ordering,
//! bounded retries, and dead-lettering. [`Pipeline`] wires the two together
//! for every registered consumer.

#![allow(async_fn_in_trait)]

pub mod capture;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod health;
pub mod index;
pub mod notifier;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod tracker;

pub use capture::{CaptureConfig, ChangeCapture, ChangeStream};
pub use coordinator::{CoordinatorConfig, DeliveryCoordinator};
pub use error::{Error, Result};
pub use handler::{ChangeHandler, Durability};
pub use health::{ComponentHealth, HealthRegistry, HealthReport, HealthStatus};
pub use index::IndexHandler;
pub use notifier::{
  LogNotifier, MailRelay, MailRelayConfig, Mailer, Notice, NoticeKind, Notifier, SmtpConfig, SmtpMailer,
};
pub use notify::NotifyHandler;
pub use pipeline::{Pipeline, PipelineConfig};
pub use retry::RetryPolicy;
pub use tracker::DeliveryTracker;
