//! Delivery coordinator: fans a change stream out to one consumer group's
//! handler with deduplication, per-row ordering, retries, and dead-lettering.
//!
//! Changes for different rows run concurrently on a bounded worker set;
//! changes for the same row run strictly in stream order. A row waiting out
//! a retry backoff is parked on a timer and holds no worker. The durable
//! cursor is a low watermark: it only moves past a position once every
//! change at or below it has been retired (handled, skipped, suppressed, or
//! dead-lettered).

use std::{
  collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
  fmt::Display,
  future::Future,
  sync::Arc,
};

use rsvp_core::{
  change::{ChangeEvent, Position, RowKey},
  delivery::{DeadLetter, DeadLetterReason, DeliveryError},
  store::DeliveryLedger,
};
use tokio::{
  sync::watch,
  task::JoinSet,
  time::{self, Instant},
};

use crate::{
  Error, Result,
  capture::{ChangeStream, pause},
  handler::{ChangeHandler, Durability},
  retry::RetryPolicy,
};

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  pub retry:       RetryPolicy,
  /// Handler calls running at once.
  pub workers:     usize,
  /// Changes received but not yet retired. Intake pauses at this bound.
  pub max_pending: usize,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self { retry: RetryPolicy::default(), workers: 8, max_pending: 1024 }
  }
}

// ─── Watermark ───────────────────────────────────────────────────────────────

/// Low-watermark cursor over out-of-order completions.
#[derive(Debug)]
pub(crate) struct Watermark {
  committed:   Position,
  highest:     Position,
  outstanding: BTreeSet<Position>,
}

impl Watermark {
  pub(crate) fn new(from: Position) -> Self {
    Self { committed: from, highest: from, outstanding: BTreeSet::new() }
  }

  /// Start tracking `position`. `false` for a re-emitted position, which the
  /// caller drops.
  pub(crate) fn track(&mut self, position: Position) -> bool {
    if position <= self.highest {
      return false;
    }
    self.highest = position;
    self.outstanding.insert(position)
  }

  pub(crate) fn retire(&mut self, position: Position) { self.outstanding.remove(&position); }

  pub(crate) fn outstanding(&self) -> usize { self.outstanding.len() }

  /// Move the watermark as far as completions allow; the new value if it
  /// moved.
  pub(crate) fn advance(&mut self) -> Option<Position> {
    let candidate = match self.outstanding.first() {
      Some(first) => Position(first.value() - 1),
      None => self.highest,
    };
    if candidate > self.committed {
      self.committed = candidate;
      Some(candidate)
    } else {
      None
    }
  }

  pub(crate) fn committed(&self) -> Position { self.committed }
}

// ─── Workers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
  /// The change will never be delivered again by this consumer.
  Retired,
  /// Shutdown interrupted the change; it stays unprocessed.
  Abandoned,
  /// A transient failure; try again at `at`. `attempts` counts the handler
  /// calls made so far.
  Retry { at: Instant, attempts: u32 },
}

/// A change waiting for a worker, with the handler calls already spent on it.
struct Pending {
  change:   ChangeEvent,
  attempts: u32,
}

struct Completion {
  key:     RowKey,
  change:  ChangeEvent,
  outcome: Outcome,
}

struct Shared<L, H> {
  ledger:     Arc<L>,
  handler:    Arc<H>,
  durability: Durability,
  retry:      RetryPolicy,
  consumer:   String,
}

impl<L: DeliveryLedger, H: ChangeHandler> Shared<L, H> {
  async fn deliver(self: Arc<Self>, pending: Pending, mut shutdown: watch::Receiver<bool>) -> Completion {
    let Pending { change, attempts } = pending;
    let outcome = self.attempt(&change, attempts, &mut shutdown).await;
    Completion { key: change.row_key(), change, outcome }
  }

  /// One handler call. Transient failures come back as [`Outcome::Retry`] so
  /// the backoff is served without a worker.
  async fn attempt(&self, change: &ChangeEvent, spent: u32, shutdown: &mut watch::Receiver<bool>) -> Outcome {
    let consumer = self.consumer.as_str();
    let position = change.position.value();

    if spent == 0 && self.durability == Durability::Persistent {
      let key = change.dedup_key();
      let lookup = self
        .persist("dedup lookup", change, shutdown, || self.ledger.is_processed(consumer, key))
        .await;
      match lookup {
        None => return Outcome::Abandoned,
        Some(true) => {
          tracing::debug!(consumer, position, row_id = change.row_id, "already processed, dropped");
          return Outcome::Retired;
        }
        Some(false) => {}
      }
    }

    let attempts = spent + 1;
    let failure = match self.handler.handle(change).await {
      Ok(delivered) => {
        tracing::debug!(
          consumer,
          position,
          row_id = change.row_id,
          attempt = attempts,
          ?delivered,
          "change retired"
        );
        return self.mark_processed(change, shutdown).await;
      }
      Err(e) => e,
    };

    match failure {
      DeliveryError::Transient(msg) if self.retry.should_retry(attempts) => {
        let delay = self.retry.delay_for_attempt(attempts);
        tracing::warn!(
          consumer,
          position,
          row_id = change.row_id,
          attempt = attempts,
          ?delay,
          error = %msg,
          "delivery failed, retrying"
        );
        Outcome::Retry { at: Instant::now() + delay, attempts }
      }
      DeliveryError::Transient(msg) => {
        self.dead_letter(change, DeadLetterReason::Exhausted, attempts, msg, shutdown).await
      }
      DeliveryError::Permanent(msg) => {
        self.dead_letter(change, DeadLetterReason::Permanent, attempts, msg, shutdown).await
      }
      DeliveryError::Corruption(msg) => {
        tracing::warn!(
          consumer,
          position,
          row_id = change.row_id,
          error = %msg,
          "change contradicts the store, flagged for reconciliation"
        );
        self.dead_letter(change, DeadLetterReason::Corruption, attempts, msg, shutdown).await
      }
    }
  }

  async fn mark_processed(&self, change: &ChangeEvent, shutdown: &mut watch::Receiver<bool>) -> Outcome {
    if self.durability == Durability::Ephemeral {
      return Outcome::Retired;
    }
    let key = change.dedup_key();
    let written = self
      .persist("mark processed", change, shutdown, || self.ledger.mark_processed(&self.consumer, key))
      .await;
    if written.is_some() { Outcome::Retired } else { Outcome::Abandoned }
  }

  async fn dead_letter(
    &self,
    change: &ChangeEvent,
    reason: DeadLetterReason,
    attempts: u32,
    last_error: String,
    shutdown: &mut watch::Receiver<bool>,
  ) -> Outcome {
    if reason != DeadLetterReason::Corruption {
      tracing::error!(
        consumer = %self.consumer,
        position = change.position.value(),
        row_id = change.row_id,
        attempts,
        reason = reason.as_str(),
        error = %last_error,
        "change dead-lettered"
      );
    }
    self.handler.dead_lettered(change);

    if self.durability == Durability::Ephemeral {
      return Outcome::Retired;
    }
    let letter = DeadLetter::new(&self.consumer, change, reason, attempts, last_error);
    let written = self
      .persist("record dead letter", change, shutdown, || {
        self.ledger.record_dead_letter(letter.clone())
      })
      .await;
    if written.is_some() { Outcome::Retired } else { Outcome::Abandoned }
  }

  /// Retry a ledger call until it succeeds; `None` if shutdown intervenes.
  async fn persist<T, F, Fut, E>(
    &self,
    what: &str,
    change: &ChangeEvent,
    shutdown: &mut watch::Receiver<bool>,
    mut op: F,
  ) -> Option<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
  {
    let mut attempt = 0u32;
    loop {
      match op().await {
        Ok(value) => return Some(value),
        Err(e) => {
          attempt = attempt.saturating_add(1);
          let delay = self.retry.delay_for_attempt(attempt.min(self.retry.max_attempts));
          tracing::warn!(
            consumer = %self.consumer,
            position = change.position.value(),
            attempt,
            ?delay,
            error = %e,
            "ledger call failed: {what}"
          );
          if !pause(delay, shutdown).await {
            return None;
          }
        }
      }
    }
  }
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

/// Delivers one consumer group's changes.
pub struct DeliveryCoordinator<L, H> {
  shared: Arc<Shared<L, H>>,
  config: CoordinatorConfig,
}

impl<L: DeliveryLedger, H: ChangeHandler> DeliveryCoordinator<L, H> {
  pub fn new(ledger: Arc<L>, handler: Arc<H>, durability: Durability, config: CoordinatorConfig) -> Self {
    let shared = Arc::new(Shared {
      consumer: handler.consumer().to_owned(),
      ledger,
      handler,
      durability,
      retry: config.retry.clone(),
    });
    Self { shared, config }
  }

  pub fn consumer(&self) -> &str { &self.shared.consumer }

  /// Where this consumer resumes: its durable cursor, or position zero for
  /// an ephemeral consumer.
  pub async fn start_position(&self) -> Result<Position> {
    match self.shared.durability {
      Durability::Persistent => {
        self.shared.ledger.load_cursor(&self.shared.consumer).await.map_err(Error::ledger)
      }
      Durability::Ephemeral => Ok(Position::ZERO),
    }
  }

  async fn save_cursor(&self, position: Position) {
    if self.shared.durability == Durability::Ephemeral {
      return;
    }
    if let Err(e) = self.shared.ledger.save_cursor(&self.shared.consumer, position).await {
      tracing::warn!(
        consumer = %self.shared.consumer,
        position = position.value(),
        error = %e,
        "cursor save failed"
      );
    }
  }

  /// Drive `stream` (tailed from `from`) until it ends or `shutdown` flips.
  /// In-flight handler calls finish; queued and parked changes are left for
  /// the next run. Returns the final cursor.
  pub async fn run(
    self,
    from: Position,
    mut stream: ChangeStream,
    mut shutdown: watch::Receiver<bool>,
  ) -> Result<Position> {
    let consumer = self.shared.consumer.clone();
    let max_workers = self.config.workers.max(1);
    let max_pending = self.config.max_pending.max(1);

    let mut watermark = Watermark::new(from);
    let mut queues: HashMap<RowKey, VecDeque<Pending>> = HashMap::new();
    // Rows with a change running or parked; their queues wait.
    let mut busy: HashSet<RowKey> = HashSet::new();
    let mut runnable: VecDeque<RowKey> = VecDeque::new();
    let mut parked: BTreeMap<(Instant, Position), (RowKey, Pending)> = BTreeMap::new();
    let mut workers: JoinSet<Completion> = JoinSet::new();
    let mut intake = true;
    let mut stopping = false;

    tracing::info!(consumer = %consumer, from = from.value(), "delivery coordinator started");

    loop {
      // Start as many runnable rows as there are free workers.
      while !stopping && workers.len() < max_workers {
        let Some(key) = runnable.pop_front() else { break };
        let Some(pending) = queues.get_mut(&key).and_then(VecDeque::pop_front) else { continue };
        busy.insert(key);
        workers.spawn(Arc::clone(&self.shared).deliver(pending, shutdown.clone()));
      }

      if workers.is_empty() && (stopping || (!intake && parked.is_empty())) {
        break;
      }

      let room = watermark.outstanding() < max_pending;
      let next_due = parked.first_key_value().map(|((at, _), _)| *at);
      tokio::select! {
        biased;

        _ = shutdown.changed(), if !stopping => {
          tracing::info!(
            consumer = %consumer,
            in_flight = workers.len(),
            parked = parked.len(),
            "delivery coordinator stopping"
          );
          stopping = true;
          queues.clear();
          runnable.clear();
          parked.clear();
        }

        joined = workers.join_next(), if !workers.is_empty() => {
          let Completion { key, change, outcome } = match joined {
            Some(Ok(done)) => done,
            Some(Err(e)) => {
              tracing::error!(consumer = %consumer, error = %e, "delivery worker failed");
              workers.abort_all();
              return Err(Error::WorkerPanicked { consumer });
            }
            None => continue,
          };

          match outcome {
            Outcome::Retired => watermark.retire(change.position),
            Outcome::Abandoned => {}
            Outcome::Retry { at, attempts } => {
              if !stopping {
                parked.insert((at, change.position), (key, Pending { change, attempts }));
              }
              continue;
            }
          }
          busy.remove(&key);
          match queues.get(&key) {
            Some(queue) if !queue.is_empty() => runnable.push_back(key),
            _ => {
              queues.remove(&key);
            }
          }

          if let Some(cursor) = watermark.advance() {
            self.save_cursor(cursor).await;
          }
        }

        () = time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() && !stopping => {
          let now = Instant::now();
          while parked.first_key_value().is_some_and(|((at, _), _)| *at <= now) {
            if let Some((_, (key, pending))) = parked.pop_first() {
              queues.entry(key).or_default().push_front(pending);
              runnable.push_back(key);
            }
          }
        }

        received = stream.recv(), if intake && !stopping && room => {
          let Some(change) = received else {
            intake = false;
            continue;
          };
          if !watermark.track(change.position) {
            tracing::debug!(
              consumer = %consumer,
              position = change.position.value(),
              "re-emitted change dropped"
            );
            continue;
          }
          let key = change.row_key();
          let queue = queues.entry(key).or_default();
          queue.push_back(Pending { change, attempts: 0 });
          if queue.len() == 1 && !busy.contains(&key) {
            runnable.push_back(key);
          }
        }
      }
    }

    if let Some(cursor) = watermark.advance() {
      self.save_cursor(cursor).await;
    }
    let cursor = watermark.committed();
    tracing::info!(consumer = %consumer, cursor = cursor.value(), "delivery coordinator stopped");
    Ok(cursor)
  }
}
