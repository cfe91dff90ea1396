//! Change capture: tails the store's change log into a bounded channel.
//!
//! A tail is lazy, infinite, and restartable from any position it has
//! emitted. Read failures are retried with capped backoff forever; the tail
//! only advances past an event after handing it to the channel, so nothing
//! is dropped or reordered. A full channel blocks the tail (backpressure).

use std::{sync::Arc, time::Duration};

use rsvp_core::{
  change::{ChangeEvent, Position, SourceTable},
  store::ChangeLog,
};
use tokio::{
  sync::{mpsc, watch},
  task::JoinHandle,
};

use crate::{health::ComponentHealth, retry::RetryPolicy};

/// Tuning for one tail.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
  /// Idle wait between polls when the log has been drained.
  pub poll_interval: Duration,
  pub batch_size:    usize,
  /// Bound of the channel between the tail and its consumer.
  pub buffer:        usize,
  /// Backoff after failed reads. Only the delays are used; reads are retried
  /// without limit.
  pub backoff:       RetryPolicy,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(250),
      batch_size:    256,
      buffer:        1024,
      backoff:       RetryPolicy::new(u32::MAX, Duration::from_millis(500), Duration::from_secs(30)),
    }
  }
}

/// The receiving end of a tail.
pub struct ChangeStream {
  rx:   mpsc::Receiver<ChangeEvent>,
  task: Option<JoinHandle<()>>,
}

impl ChangeStream {
  /// A stream fed directly through a channel, with no tail behind it.
  #[cfg(test)]
  pub(crate) fn from_receiver(rx: mpsc::Receiver<ChangeEvent>) -> Self { Self { rx, task: None } }

  /// The next change, or `None` once the tail has stopped.
  pub async fn recv(&mut self) -> Option<ChangeEvent> { self.rx.recv().await }

  /// Stop the tail without waiting for shutdown.
  pub fn abort(&self) {
    if let Some(task) = &self.task {
      task.abort();
    }
  }
}

impl Drop for ChangeStream {
  fn drop(&mut self) { self.abort(); }
}

/// Change Capture Adapter over a [`ChangeLog`].
pub struct ChangeCapture<L> {
  log:    Arc<L>,
  config: CaptureConfig,
  health: Arc<ComponentHealth>,
}

impl<L: ChangeLog> ChangeCapture<L> {
  pub fn new(log: Arc<L>, config: CaptureConfig, health: Arc<ComponentHealth>) -> Self {
    Self { log, config, health }
  }

  /// Tail `tables` from (exclusive) `from` until `shutdown` flips to `true`.
  pub fn tail(
    &self,
    from: Position,
    tables: Vec<SourceTable>,
    shutdown: watch::Receiver<bool>,
  ) -> ChangeStream {
    let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
    let task = tokio::spawn(run_tail(
      Arc::clone(&self.log),
      self.config.clone(),
      Arc::clone(&self.health),
      from,
      tables,
      tx,
      shutdown,
    ));
    ChangeStream { rx, task: Some(task) }
  }
}

/// Sleep for `delay`; `false` if shutdown was signalled first.
pub(crate) async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
  if *shutdown.borrow() {
    return false;
  }
  tokio::select! {
    () = tokio::time::sleep(delay) => true,
    _ = shutdown.changed() => false,
  }
}

async fn run_tail<L: ChangeLog>(
  log: Arc<L>,
  config: CaptureConfig,
  health: Arc<ComponentHealth>,
  from: Position,
  tables: Vec<SourceTable>,
  tx: mpsc::Sender<ChangeEvent>,
  mut shutdown: watch::Receiver<bool>,
) {
  let name = health.name().to_owned();
  let mut after = from;
  let mut failures = 0u32;
  tracing::info!(component = %name, from = after.value(), "change tail started");

  loop {
    if *shutdown.borrow() {
      break;
    }

    let batch = match log.read_changes(after, &tables, config.batch_size).await {
      Ok(batch) => batch,
      Err(e) => {
        failures = failures.saturating_add(1);
        health.record_failure(&e);
        let delay = config.backoff.delay_for_attempt(failures);
        tracing::warn!(
          component = %name,
          position = after.value(),
          attempt = failures,
          ?delay,
          error = %e,
          "change log read failed, backing off"
        );
        if !pause(delay, &mut shutdown).await {
          break;
        }
        continue;
      }
    };

    if failures > 0 {
      tracing::info!(component = %name, after_failures = failures, "change log reachable again");
    }
    failures = 0;
    health.record_success();

    let drained = batch.len() < config.batch_size;
    for change in batch {
      let position = change.position;
      tokio::select! {
        sent = tx.send(change) => {
          if sent.is_err() {
            tracing::debug!(component = %name, "change stream receiver dropped");
            return;
          }
        }
        _ = shutdown.changed() => {
          tracing::info!(component = %name, position = after.value(), "change tail stopped");
          return;
        }
      }
      after = position;
    }

    if drained && !pause(config.poll_interval, &mut shutdown).await {
      break;
    }
  }

  tracing::info!(component = %name, position = after.value(), "change tail stopped");
}
