//! In-process view of the delivery state machine, per registration.

use std::{
  collections::HashMap,
  sync::{Mutex, PoisonError},
};

use rsvp_core::delivery::RegistrationDelivery;

/// Registrations tracked before settled ones are evicted.
pub const DEFAULT_TRACKER_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Entry {
  delivery: RegistrationDelivery,
  touched:  u64,
}

#[derive(Debug, Default)]
struct Entries {
  map:   HashMap<i64, Entry>,
  clock: u64,
}

/// Delivery state of the registrations the running pipeline has touched.
///
/// This is observability, not the source of truth: idempotency comes from
/// the store (`email_sent`) and the delivery ledger. The state resets on
/// restart. Past `capacity`, the least recently touched settled entries are
/// evicted; entries with work pending or in flight are always kept.
#[derive(Debug)]
pub struct DeliveryTracker {
  entries:  Mutex<Entries>,
  capacity: usize,
}

impl Default for DeliveryTracker {
  fn default() -> Self { Self::with_capacity(DEFAULT_TRACKER_CAPACITY) }
}

impl DeliveryTracker {
  pub fn new() -> Self { Self::default() }

  pub fn with_capacity(capacity: usize) -> Self {
    Self { entries: Mutex::new(Entries::default()), capacity: capacity.max(1) }
  }

  /// Apply `f` to the state of `registration_id`, creating it if absent.
  pub fn update<R>(&self, registration_id: i64, f: impl FnOnce(&mut RegistrationDelivery) -> R) -> R {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.clock += 1;
    let clock = entries.clock;
    let entry = entries.map.entry(registration_id).or_default();
    entry.touched = clock;
    let result = f(&mut entry.delivery);

    if entries.map.len() > self.capacity {
      self.evict(&mut entries, registration_id);
    }
    result
  }

  pub fn get(&self, registration_id: i64) -> Option<RegistrationDelivery> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.map.get(&registration_id).map(|e| e.delivery)
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).map.len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Drop settled entries, oldest first, down to three quarters of capacity
  /// so the scan runs once per batch of inserts.
  fn evict(&self, entries: &mut Entries, keep: i64) {
    let target = self.capacity - self.capacity / 4;
    let mut settled: Vec<(u64, i64)> = entries
      .map
      .iter()
      .filter(|(id, e)| **id != keep && e.delivery.is_settled())
      .map(|(id, e)| (e.touched, *id))
      .collect();
    settled.sort_unstable();

    let excess = entries.map.len().saturating_sub(target);
    for (_, id) in settled.into_iter().take(excess) {
      entries.map.remove(&id);
    }
    tracing::debug!(tracked = entries.map.len(), "delivery tracker evicted settled entries");
  }
}

#[cfg(test)]
mod tests {
  use rsvp_core::delivery::NotifyState;

  use super::*;

  #[test]
  fn update_creates_and_mutates() {
    let tracker = DeliveryTracker::new();
    assert!(tracker.get(1).is_none());

    assert!(tracker.update(1, |d| d.confirmation_pending()));
    tracker.update(1, |d| d.confirmation_sent());
    assert!(!tracker.update(1, |d| d.confirmation_pending()));
    assert_eq!(tracker.get(1).unwrap().notify, Some(NotifyState::Notified));
  }

  #[test]
  fn settled_entries_are_evicted_past_capacity() {
    let tracker = DeliveryTracker::with_capacity(4);
    // Row 1 still owes a confirmation.
    tracker.update(1, |d| d.confirmation_pending());
    for id in 2..=4 {
      tracker.update(id, |d| d.confirmation_sent());
    }
    assert_eq!(tracker.len(), 4);

    tracker.update(5, |d| d.index_fresh());
    assert_eq!(tracker.len(), 3);
    assert!(tracker.get(1).is_some(), "pending work is never evicted");
    assert!(tracker.get(2).is_none());
    assert!(tracker.get(3).is_none());
    assert!(tracker.get(4).is_some());
    assert!(tracker.get(5).is_some());
  }

  #[test]
  fn unsettled_entries_may_exceed_capacity() {
    let tracker = DeliveryTracker::with_capacity(2);
    for id in 1..=5 {
      tracker.update(id, |d| d.index_stale());
    }
    assert_eq!(tracker.len(), 5);
  }
}
