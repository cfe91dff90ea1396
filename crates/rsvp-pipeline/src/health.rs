//! Liveness and readiness of pipeline components.
//!
//! Every change tail owns a [`ComponentHealth`] and reports each poll of its
//! upstream log. A [`HealthRegistry`] aggregates them for the probes: the
//! pipeline is ready once every component has connected at least once.

use std::{
  fmt,
  sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum HealthStatus {
  /// Connected, and the last poll succeeded.
  Healthy,
  /// Connected before, but the most recent polls failed.
  Degraded(String),
  /// Never reached its upstream source.
  Unhealthy(String),
  /// Not started yet.
  #[default]
  Unknown,
}

impl HealthStatus {
  pub fn is_healthy(&self) -> bool { matches!(self, Self::Healthy) }

  /// Whether the component can still make progress.
  pub fn is_operational(&self) -> bool { matches!(self, Self::Healthy | Self::Degraded(_)) }
}

impl fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Healthy => write!(f, "healthy"),
      Self::Degraded(msg) => write!(f, "degraded: {msg}"),
      Self::Unhealthy(msg) => write!(f, "unhealthy: {msg}"),
      Self::Unknown => write!(f, "unknown"),
    }
  }
}

// ─── Component ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct State {
  connected:            bool,
  last_success:         Option<DateTime<Utc>>,
  last_error:           Option<String>,
  consecutive_failures: u32,
}

/// Shared health record of one component.
#[derive(Debug)]
pub struct ComponentHealth {
  name:  String,
  state: Mutex<State>,
}

/// Point-in-time view of a [`ComponentHealth`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
  pub name:                 String,
  pub status:               HealthStatus,
  pub connected:            bool,
  pub last_success:         Option<DateTime<Utc>>,
  pub consecutive_failures: u32,
}

impl ComponentHealth {
  pub fn new(name: impl Into<String>) -> Arc<Self> {
    Arc::new(Self { name: name.into(), state: Mutex::new(State::default()) })
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn record_success(&self) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.connected = true;
    state.last_success = Some(Utc::now());
    state.last_error = None;
    state.consecutive_failures = 0;
  }

  pub fn record_failure(&self, error: &dyn fmt::Display) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
    state.last_error = Some(error.to_string());
  }

  pub fn is_connected(&self) -> bool {
    self.state.lock().unwrap_or_else(PoisonError::into_inner).connected
  }

  pub fn report(&self) -> HealthReport {
    let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    let status = match (state.connected, state.consecutive_failures, &state.last_error) {
      (true, 0, _) => HealthStatus::Healthy,
      (true, n, err) => HealthStatus::Degraded(format!(
        "{n} consecutive failures, last: {}",
        err.as_deref().unwrap_or("unknown")
      )),
      (false, 0, _) => HealthStatus::Unknown,
      (false, _, err) => HealthStatus::Unhealthy(err.clone().unwrap_or_default()),
    };
    HealthReport {
      name: self.name.clone(),
      status,
      connected: state.connected,
      last_success: state.last_success,
      consecutive_failures: state.consecutive_failures,
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// The set of components the probes report on. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
  components: Arc<Mutex<Vec<Arc<ComponentHealth>>>>,
}

impl HealthRegistry {
  pub fn new() -> Self { Self::default() }

  pub fn register(&self, component: Arc<ComponentHealth>) {
    self.components.lock().unwrap_or_else(PoisonError::into_inner).push(component);
  }

  /// Ready once there is at least one component and all have connected.
  pub fn is_ready(&self) -> bool {
    let components = self.components.lock().unwrap_or_else(PoisonError::into_inner);
    !components.is_empty() && components.iter().all(|c| c.is_connected())
  }

  pub fn reports(&self) -> Vec<HealthReport> {
    let components = self.components.lock().unwrap_or_else(PoisonError::into_inner);
    components.iter().map(|c| c.report()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_follows_polls() {
    let c = ComponentHealth::new("capture:notify");
    assert_eq!(c.report().status, HealthStatus::Unknown);

    c.record_failure(&"connection refused");
    assert!(matches!(c.report().status, HealthStatus::Unhealthy(ref m) if m == "connection refused"));
    assert!(!c.report().status.is_operational());

    c.record_success();
    assert!(c.report().status.is_healthy());
    assert!(c.report().last_success.is_some());

    c.record_failure(&"disk I/O error");
    let report = c.report();
    assert!(report.status.is_operational());
    assert!(!report.status.is_healthy());
    assert_eq!(report.consecutive_failures, 1);
  }

  #[test]
  fn registry_is_ready_only_when_all_connected() {
    let registry = HealthRegistry::new();
    assert!(!registry.is_ready());

    let a = ComponentHealth::new("a");
    let b = ComponentHealth::new("b");
    registry.register(a.clone());
    registry.register(b.clone());

    a.record_success();
    assert!(!registry.is_ready());
    b.record_success();
    assert!(registry.is_ready());
    assert_eq!(registry.reports().len(), 2);
  }
}
