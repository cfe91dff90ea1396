//! Router tests against an in-memory `SqliteStore`.

use std::sync::Arc;

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use rsvp_core::{
  change::{ChangeEvent, Operation, Position, SourceTable},
  delivery::{DeadLetter, DeadLetterReason},
  search::{EventDocument, SearchIndex},
  store::DeliveryLedger,
};
use rsvp_search::{SearchLimits, SearchProjection};
use rsvp_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::api_router;

struct Harness {
  store:      Arc<SqliteStore>,
  projection: Arc<SearchProjection>,
}

impl Harness {
  async fn new() -> Self {
    let store = SqliteStore::open_in_memory().await.unwrap();
    Self { store: Arc::new(store), projection: Arc::new(SearchProjection::new()) }
  }

  fn router(&self) -> Router {
    api_router(Arc::clone(&self.store), Arc::clone(&self.projection), SearchLimits::default())
  }

  async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = self.router().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
  }

  async fn user(&self, name: &str) -> i64 {
    let body = json!({
      "username": name,
      "email": format!("{name}@example.com"),
      "password": "correct horse",
      "full_name": null,
    });
    let (status, user) = self.call("POST", "/users", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{user}");
    user["id"].as_i64().unwrap()
  }

  async fn event(&self, title: &str, capacity: Option<i64>) -> i64 {
    let body = json!({
      "title": title,
      "description": null,
      "category": null,
      "location": "Hall A",
      "event_date": "2026-11-05",
      "event_time": "18:30:00",
      "organizer": null,
      "capacity": capacity,
    });
    let (status, event) = self.call("POST", "/events", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{event}");
    event["id"].as_i64().unwrap()
  }
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn user_round_trip_hides_the_credential() {
  let h = Harness::new().await;
  let id = h.user("alice").await;

  let (status, user) = h.call("GET", &format!("/users/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(user["username"], "alice");
  assert!(user.get("password_hash").is_none());

  let (status, _) = h.call("GET", "/users/999", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_user_is_a_bad_request() {
  let h = Harness::new().await;
  let body = json!({ "username": "bob", "email": "not-an-email", "password": "correct horse" });
  let (status, err) = h.call("POST", "/users", Some(body)).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(err["error"].as_str().unwrap().contains("invalid email"));
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_require_a_known_category() {
  let h = Harness::new().await;
  let (status, _) = h.call("POST", "/categories", Some(json!({ "name": "Music" }))).await;
  assert_eq!(status, StatusCode::CREATED);

  let mut body = json!({
    "title": "Jazz night",
    "category": "music",
    "event_date": "2026-11-05",
    "event_time": "18:30:00",
  });
  let (status, event) = h.call("POST", "/events", Some(body.clone())).await;
  assert_eq!(status, StatusCode::CREATED, "{event}");
  assert_eq!(event["category"], "Music");

  body["category"] = json!("Opera");
  let (status, _) = h.call("POST", "/events", Some(body)).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, events) = h.call("GET", "/events?category=music&search=jazz", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(events.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn event_update_and_delete() {
  let h = Harness::new().await;
  let id = h.event("Chess club", None).await;

  let body = json!({ "title": "Chess league", "event_date": "2026-12-01", "event_time": "19:00:00" });
  let (status, event) = h.call("PUT", &format!("/events/{id}"), Some(body.clone())).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(event["title"], "Chess league");

  let (status, _) = h.call("DELETE", &format!("/events/{id}"), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = h.call("GET", &format!("/events/{id}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = h.call("PUT", &format!("/events/{id}"), Some(body)).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Registrations ───────────────────────────────────────────────────────────

#[tokio::test]
async fn registration_conflicts_and_cancellation() {
  let h = Harness::new().await;
  let alice = h.user("alice").await;
  let bob = h.user("bob").await;
  let gala = h.event("Gala", Some(1)).await;

  let body = json!({ "user_id": alice, "event_id": gala });
  let (status, registration) = h.call("POST", "/registrations", Some(body.clone())).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(registration["status"], "registered");
  let id = registration["id"].as_i64().unwrap();

  let (status, _) = h.call("POST", "/registrations", Some(body)).await;
  assert_eq!(status, StatusCode::CONFLICT);

  let full = json!({ "user_id": bob, "event_id": gala });
  let (status, err) = h.call("POST", "/registrations", Some(full)).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(err["error"], format!("event {gala} is full"));

  let (status, details) = h.call("GET", &format!("/registrations/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(details["event_title"], "Gala");
  assert_eq!(details["email_sent"], false);

  let (status, mine) = h.call("GET", &format!("/users/{alice}/registrations"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(mine.as_array().unwrap().len(), 1);

  let cancel = format!("/registrations/{id}/cancel");
  let (status, cancelled) = h.call("POST", &cancel, None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(cancelled["status"], "cancelled");
  let (status, _) = h.call("POST", &cancel, None).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn registration_for_unknown_ids_is_not_found() {
  let h = Harness::new().await;
  let alice = h.user("alice").await;

  let (status, _) =
    h.call("POST", "/registrations", Some(json!({ "user_id": alice, "event_id": 42 }))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = h.call("POST", "/registrations/42/cancel", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Search ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn search_reads_the_projection_with_clamped_limits() {
  let h = Harness::new().await;
  for id in 1..=25 {
    let doc = EventDocument {
      event_id:    id,
      title:       format!("Jazz session {id}"),
      description: None,
      category:    Some("Music".into()),
      location:    None,
      event_date:  chrono::NaiveDate::from_ymd_opt(2026, 11, 5).unwrap(),
      event_time:  chrono::NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
      organizer:   None,
    };
    h.projection.upsert(doc).await.unwrap();
  }

  let (_, hits) = h.call("GET", "/search?q=jazz", None).await;
  assert_eq!(hits.as_array().unwrap().len(), 6);
  let (_, hits) = h.call("GET", "/search?q=jazz&limit=100", None).await;
  assert_eq!(hits.as_array().unwrap().len(), 20);
  let (_, hits) = h.call("GET", "/search?q=opera", None).await;
  assert!(hits.as_array().unwrap().is_empty());
}

// ─── Dead letters ────────────────────────────────────────────────────────────

#[tokio::test]
async fn dead_letters_list_and_resolve() {
  let h = Harness::new().await;
  let change = ChangeEvent {
    position:     Position(7),
    table:        SourceTable::EventRegistrations,
    row_id:       3,
    operation:    Operation::Insert,
    before:       None,
    after:        None,
    committed_at: chrono::Utc::now(),
  };
  let letter = DeadLetter::new("notify", &change, DeadLetterReason::Exhausted, 5, "relay down");
  let id = letter.dead_letter_id;
  h.store.record_dead_letter(letter).await.unwrap();

  let (status, letters) = h.call("GET", "/dead-letters", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(letters[0]["reason"], "exhausted");

  let resolve = format!("/dead-letters/{id}/resolve");
  let (status, _) = h.call("POST", &resolve, None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = h.call("POST", &resolve, None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (_, open) = h.call("GET", "/dead-letters", None).await;
  assert!(open.as_array().unwrap().is_empty());
  let (_, all) = h.call("GET", "/dead-letters?unresolved=false", None).await;
  assert_eq!(all.as_array().unwrap().len(), 1);
}
