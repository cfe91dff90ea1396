//! HTTP surface of the rsvp server: configuration, probes, and the router
//! that mounts the REST API.

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Json, Router,
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::get,
};
use rsvp_pipeline::{
  CaptureConfig, CoordinatorConfig, DeliveryTracker, HealthRegistry, MailRelayConfig,
  PipelineConfig, RetryPolicy, SmtpConfig, notifier::default_smtp_port,
};
use rsvp_search::{SearchLimits, SearchProjection};
use rsvp_store_sqlite::SqliteStore;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and `RSVP_*`
/// environment variables. Every key has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub mail:       MailConfig,
  pub search:     SearchConfig,
  pub delivery:   DeliveryConfig,
  pub capture:    CaptureSettings,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "0.0.0.0".to_owned(),
      port:       8000,
      store_path: PathBuf::from("rsvp.db"),
      mail:       MailConfig::default(),
      search:     SearchConfig::default(),
      delivery:   DeliveryConfig::default(),
      capture:    CaptureSettings::default(),
    }
  }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MailConfig {
  /// SMTP submission host. Takes precedence over `relay_url`.
  pub host:       Option<String>,
  pub port:       u16,
  /// HTTP mail relay. With neither set, notices are logged, not sent.
  pub relay_url:  Option<String>,
  pub username:   String,
  pub password:   String,
  pub from_email: String,
  pub from_name:  String,
}

impl Default for MailConfig {
  fn default() -> Self {
    Self {
      host:       None,
      port:       default_smtp_port(),
      relay_url:  None,
      username:   String::new(),
      password:   String::new(),
      from_email: String::new(),
      from_name:  "Event Management System".to_owned(),
    }
  }
}

impl MailConfig {
  pub fn smtp(&self) -> Option<SmtpConfig> {
    let host = self.host.clone().filter(|h| !h.is_empty())?;
    Some(SmtpConfig {
      host,
      port: self.port,
      username: self.username.clone(),
      password: self.password.clone(),
      from_email: self.from_email.clone(),
      from_name: self.from_name.clone(),
    })
  }

  pub fn relay(&self) -> Option<MailRelayConfig> {
    let relay_url = self.relay_url.clone().filter(|u| !u.is_empty())?;
    Some(MailRelayConfig {
      relay_url,
      username: self.username.clone(),
      password: self.password.clone(),
      from_email: self.from_email.clone(),
      from_name: self.from_name.clone(),
    })
  }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
  /// Remote search engine to mirror events into.
  pub endpoint:      Option<String>,
  pub default_limit: usize,
  pub max_limit:     usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    let limits = SearchLimits::default();
    Self { endpoint: None, default_limit: limits.default_limit, max_limit: limits.max_limit }
  }
}

impl SearchConfig {
  pub fn limits(&self) -> SearchLimits {
    SearchLimits { default_limit: self.default_limit, max_limit: self.max_limit }
  }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
  pub max_attempts:    u32,
  pub backoff_base_ms: u64,
  pub backoff_max_ms:  u64,
  pub sink_timeout_ms: u64,
  pub workers:         usize,
  pub max_pending:     usize,
}

impl Default for DeliveryConfig {
  fn default() -> Self {
    Self {
      max_attempts:    5,
      backoff_base_ms: 500,
      backoff_max_ms:  30_000,
      sink_timeout_ms: 10_000,
      workers:         8,
      max_pending:     1024,
    }
  }
}

impl DeliveryConfig {
  pub fn retry(&self) -> RetryPolicy {
    RetryPolicy::new(
      self.max_attempts,
      Duration::from_millis(self.backoff_base_ms),
      Duration::from_millis(self.backoff_max_ms),
    )
  }

  pub fn sink_timeout(&self) -> Duration { Duration::from_millis(self.sink_timeout_ms) }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureSettings {
  pub poll_interval_ms: u64,
  pub batch_size:       usize,
}

impl Default for CaptureSettings {
  fn default() -> Self { Self { poll_interval_ms: 250, batch_size: 256 } }
}

impl ServerConfig {
  /// Tuning for every consumer group of the pipeline.
  pub fn pipeline(&self) -> PipelineConfig {
    let retry = self.delivery.retry();
    PipelineConfig {
      capture:     CaptureConfig {
        poll_interval: Duration::from_millis(self.capture.poll_interval_ms),
        batch_size:    self.capture.batch_size.max(1),
        buffer:        self.capture.batch_size.max(1),
        // Reads are retried without limit; only the delays come from here.
        backoff:       RetryPolicy::new(u32::MAX, retry.initial_backoff, retry.max_backoff),
      },
      coordinator: CoordinatorConfig {
        retry,
        workers: self.delivery.workers,
        max_pending: self.delivery.max_pending,
      },
    }
  }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state of the probe and delivery-status handlers.
#[derive(Clone)]
pub struct AppState {
  pub store:      Arc<SqliteStore>,
  pub projection: Arc<SearchProjection>,
  pub limits:     SearchLimits,
  pub health:     HealthRegistry,
  pub tracker:    Arc<DeliveryTracker>,
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the full HTTP router: probes, delivery status, and the API under
/// `/api`.
pub fn router(state: AppState) -> Router {
  let api = rsvp_api::api_router(Arc::clone(&state.store), Arc::clone(&state.projection), state.limits);

  Router::new()
    .route("/health/ready", get(ready))
    .route("/health/live", get(live))
    .route("/deliveries/{registration_id}", get(delivery))
    .with_state(state)
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
}

// ─── Probes ──────────────────────────────────────────────────────────────────

/// `GET /health/ready`: 200 once the store answers and every change tail
/// has connected, 503 before that.
async fn ready(State(state): State<AppState>) -> Response {
  let store_ok = match state.store.ping().await {
    Ok(()) => true,
    Err(e) => {
      tracing::warn!(error = %e, "readiness: store unreachable");
      false
    }
  };
  let ready = store_ok && state.health.is_ready();
  let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

  let body = json!({
    "ready":      ready,
    "store":      if store_ok { "connected" } else { "unreachable" },
    "components": state.health.reports(),
  });
  (status, Json(body)).into_response()
}

/// `GET /health/live`
async fn live(State(state): State<AppState>) -> Json<serde_json::Value> {
  Json(json!({
    "alive":      true,
    "components": state.health.reports(),
  }))
}

// ─── Delivery status ─────────────────────────────────────────────────────────

/// `GET /deliveries/{registration_id}`: the in-process delivery state of a
/// registration since this server started.
async fn delivery(State(state): State<AppState>, Path(registration_id): Path<i64>) -> Response {
  match state.tracker.get(registration_id) {
    Some(delivery) => Json(json!({
      "registration_id": registration_id,
      "notify":          delivery.notify,
      "index":           delivery.index,
    }))
    .into_response(),
    None => (
      StatusCode::NOT_FOUND,
      Json(json!({ "error": format!("no delivery activity for registration {registration_id}") })),
    )
      .into_response(),
  }
}

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use rsvp_pipeline::ComponentHealth;
  use serde_json::Value;
  use tower::ServiceExt as _;

  use super::*;

  async fn make_state() -> AppState {
    AppState {
      store:      Arc::new(SqliteStore::open_in_memory().await.unwrap()),
      projection: Arc::new(SearchProjection::new()),
      limits:     SearchLimits::default(),
      health:     HealthRegistry::new(),
      tracker:    Arc::new(DeliveryTracker::new()),
    }
  }

  async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[test]
  fn config_defaults() {
    let config = ServerConfig::default();
    assert_eq!(config.port, 8000);
    assert_eq!(config.mail.from_name, "Event Management System");
    assert!(config.mail.relay().is_none());
    assert!(config.mail.smtp().is_none());
    assert_eq!(config.mail.port, 587);

    let pipeline = config.pipeline();
    assert_eq!(pipeline.coordinator.retry.max_attempts, 5);
    assert_eq!(pipeline.coordinator.workers, 8);
    assert_eq!(pipeline.capture.poll_interval, Duration::from_millis(250));
  }

  #[test]
  fn config_layers_over_defaults() {
    let settings = config::Config::builder()
      .add_source(config::File::from_str(
        "port = 9000\n[delivery]\nmax_attempts = 2\n[mail]\nrelay_url = \"http://relay.local/send\"\n",
        config::FileFormat::Toml,
      ))
      .build()
      .unwrap();
    let config: ServerConfig = settings.try_deserialize().unwrap();

    assert_eq!(config.port, 9000);
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.delivery.max_attempts, 2);
    assert_eq!(config.delivery.workers, 8);
    let relay = config.mail.relay().unwrap();
    assert_eq!(relay.relay_url, "http://relay.local/send");
    assert_eq!(relay.from_name, "Event Management System");
    assert!(config.mail.smtp().is_none());
  }

  #[test]
  fn smtp_settings_come_from_the_mail_section() {
    let settings = config::Config::builder()
      .add_source(config::File::from_str(
        "[mail]\nhost = \"smtp.example.com\"\nusername = \"events@example.com\"\npassword = \"hunter2\"\n",
        config::FileFormat::Toml,
      ))
      .build()
      .unwrap();
    let config: ServerConfig = settings.try_deserialize().unwrap();

    let smtp = config.mail.smtp().unwrap();
    assert_eq!(smtp.host, "smtp.example.com");
    assert_eq!(smtp.port, 587);
    assert_eq!(smtp.username, "events@example.com");
    assert_eq!(smtp.from_name, "Event Management System");
  }

  #[tokio::test]
  async fn readiness_waits_for_every_component() {
    let state = make_state().await;
    let tail = ComponentHealth::new("capture:notify");
    state.health.register(Arc::clone(&tail));

    let (status, body) = get_json(state.clone(), "/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
    assert_eq!(body["components"][0]["name"], "capture:notify");

    tail.record_success();
    let (status, body) = get_json(state.clone(), "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "connected");

    let (status, body) = get_json(state, "/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["components"][0]["last_success"].is_string());
  }

  #[tokio::test]
  async fn delivery_status_reports_tracked_registrations() {
    let state = make_state().await;
    state.tracker.update(4, |d| d.confirmation_sent());

    let (status, body) = get_json(state.clone(), "/deliveries/4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notify"], "notified");
    assert_eq!(body["index"], Value::Null);

    let (status, _) = get_json(state, "/deliveries/5").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn api_is_mounted_under_prefix() {
    let state = make_state().await;
    let (status, body) = get_json(state, "/api/categories").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().is_some());
  }
}
