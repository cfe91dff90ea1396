//! Wiring: one change tail plus one delivery coordinator per consumer group,
//! all stopped by a single shutdown signal.

use std::sync::Arc;

use rsvp_core::{
  change::Position,
  store::{ChangeLog, DeliveryLedger},
};
use tokio::{sync::watch, task::JoinSet};

use crate::{
  Error, Result,
  capture::{CaptureConfig, ChangeCapture},
  coordinator::{CoordinatorConfig, DeliveryCoordinator},
  handler::{ChangeHandler, Durability},
  health::{ComponentHealth, HealthRegistry},
};

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
  pub capture:     CaptureConfig,
  pub coordinator: CoordinatorConfig,
}

/// A running set of consumer groups over one store.
pub struct Pipeline<S> {
  store:     Arc<S>,
  config:    PipelineConfig,
  health:    HealthRegistry,
  stop:      watch::Sender<bool>,
  consumers: JoinSet<(String, Result<Position>)>,
}

impl<S: ChangeLog + DeliveryLedger> Pipeline<S> {
  pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
    let (stop, _) = watch::channel(false);
    Self { store, config, health: HealthRegistry::new(), stop, consumers: JoinSet::new() }
  }

  /// Health of every change tail started so far.
  pub fn health(&self) -> HealthRegistry { self.health.clone() }

  /// Start delivering to `handler` from its durable cursor (or from zero for
  /// an ephemeral consumer).
  pub async fn spawn_consumer<H: ChangeHandler>(&mut self, handler: H, durability: Durability) -> Result<()> {
    let handler = Arc::new(handler);
    let consumer = handler.consumer().to_owned();

    let coordinator = DeliveryCoordinator::new(
      Arc::clone(&self.store),
      Arc::clone(&handler),
      durability,
      self.config.coordinator.clone(),
    );
    let from = coordinator.start_position().await?;

    let health = ComponentHealth::new(format!("capture:{consumer}"));
    self.health.register(Arc::clone(&health));
    let capture = ChangeCapture::new(Arc::clone(&self.store), self.config.capture.clone(), health);
    let stream = capture.tail(from, handler.tables().to_vec(), self.stop.subscribe());
    let shutdown = self.stop.subscribe();

    tracing::info!(consumer = %consumer, from = from.value(), ?durability, "consumer started");
    self.consumers.spawn(async move {
      let result = coordinator.run(from, stream, shutdown).await;
      (consumer, result)
    });
    Ok(())
  }

  /// Wait for a consumer to exit on its own. Consumers only stop early on
  /// failure; `None` when none are running.
  pub async fn next_exit(&mut self) -> Option<(String, Result<Position>)> {
    match self.consumers.join_next().await? {
      Ok(exit) => Some(exit),
      Err(e) => Some((String::from("unknown"), Err(Error::Join(e)))),
    }
  }

  /// Signal every consumer to stop and wait for in-flight deliveries. The
  /// first consumer failure, if any, is returned.
  pub async fn shutdown(mut self) -> Result<()> {
    self.stop.send_replace(true);

    let mut failure = None;
    while let Some(joined) = self.consumers.join_next().await {
      match joined {
        Ok((consumer, Ok(cursor))) => {
          tracing::info!(consumer = %consumer, cursor = cursor.value(), "consumer stopped");
        }
        Ok((consumer, Err(e))) => {
          tracing::error!(consumer = %consumer, error = %e, "consumer failed");
          failure.get_or_insert(e);
        }
        Err(e) => {
          tracing::error!(error = %e, "consumer task failed");
          failure.get_or_insert(Error::Join(e));
        }
      }
    }

    failure.map_or(Ok(()), Err)
  }
}
