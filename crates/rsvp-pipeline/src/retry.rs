//! Bounded exponential backoff for per-event delivery retries.

use std::time::Duration;

/// Retry policy for one change event.
///
/// `max_attempts` counts every handler call, the first one included, so a
/// policy of 5 calls the handler at most five times before dead-lettering.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  pub max_attempts:    u32,
  /// Delay after the first failed attempt.
  pub initial_backoff: Duration,
  pub max_backoff:     Duration,
  pub multiplier:      f64,
  /// Fraction (0.0-1.0) of the delay to spread retries by.
  pub jitter:          f64,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      initial_backoff,
      max_backoff,
      multiplier: 2.0,
      jitter: 0.1,
    }
  }

  /// No waiting between attempts. Used by tests.
  pub fn immediate(max_attempts: u32) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      initial_backoff: Duration::ZERO,
      max_backoff: Duration::ZERO,
      multiplier: 1.0,
      jitter: 0.0,
    }
  }

  /// Delay to wait after `attempt` failed attempts.
  #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    if attempt == 0 {
      return Duration::ZERO;
    }

    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
    let clamped = base.min(self.max_backoff.as_secs_f64());

    // Golden-ratio sequence: spread without an RNG, reproducible in tests.
    let offset = if self.jitter > 0.0 {
      let unit = ((f64::from(attempt) * 0.618_033_988_749_895) % 1.0) * 2.0 - 1.0;
      clamped * self.jitter.clamp(0.0, 1.0) * unit
    } else {
      0.0
    };

    Duration::from_secs_f64((clamped + offset).clamp(0.0, self.max_backoff.as_secs_f64()))
  }

  /// Whether another attempt is allowed after `attempts` have been made.
  pub fn should_retry(&self, attempts: u32) -> bool { attempts < self.max_attempts }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(5, Duration::from_millis(500), Duration::from_secs(30))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_grows_and_caps() {
    let policy = RetryPolicy { jitter: 0.0, ..RetryPolicy::default() };
    assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
    assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
  }

  #[test]
  fn jitter_stays_within_bounds() {
    let policy = RetryPolicy::default();
    for attempt in 1..10 {
      let d = policy.delay_for_attempt(attempt);
      assert!(d <= policy.max_backoff, "attempt {attempt}: {d:?}");
    }
    assert!(policy.delay_for_attempt(1) >= Duration::from_millis(450));
  }

  #[test]
  fn attempts_are_bounded() {
    let policy = RetryPolicy::immediate(3);
    assert!(policy.should_retry(1));
    assert!(policy.should_retry(2));
    assert!(!policy.should_retry(3));
    assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
  }
}
