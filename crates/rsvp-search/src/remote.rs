//! HTTP mirror of the projection into an external vector search engine.
//!
//! Objects live under the `Event` class. Their ids are UUID v5 values derived
//! from the event id, so an upsert replayed after a crash targets the same
//! object instead of creating a duplicate.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use rsvp_core::search::{EventDocument, SearchIndex};
use serde_json::json;
use uuid::Uuid;

use crate::{Error, Result};

const CLASS: &str = "Event";

/// Write-side client for `{endpoint}/v1/objects`.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct RemoteIndex {
  client:   Client,
  endpoint: String,
}

impl RemoteIndex {
  pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, endpoint: endpoint.into().trim_end_matches('/').to_owned() })
  }

  /// The remote object id for an event.
  pub fn object_id(event_id: i64) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("event:{event_id}").as_bytes())
  }

  fn object_url(&self, event_id: i64) -> String {
    format!("{}/v1/objects/{CLASS}/{}", self.endpoint, Self::object_id(event_id))
  }

  async fn check(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
      return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Status { status: status.as_u16(), body })
  }
}

impl SearchIndex for RemoteIndex {
  type Error = Error;

  async fn upsert(&self, document: EventDocument) -> Result<()> {
    let id = Self::object_id(document.event_id);
    let object = json!({
      "class": CLASS,
      "id": id,
      "properties": {
        "title":       document.title,
        "description": document.description,
        "category":    document.category,
        "location":    document.location,
        "event_date":  document.event_date.format("%Y-%m-%d").to_string(),
        "event_time":  document.event_time.format("%H:%M:%S").to_string(),
        "organizer":   document.organizer,
        "postgres_id": document.event_id,
      },
    });

    let resp = self.client.put(self.object_url(document.event_id)).json(&object).send().await?;
    if resp.status() != StatusCode::NOT_FOUND {
      return Self::check(resp).await;
    }

    // PUT only replaces; the first write creates.
    let resp = self
      .client
      .post(format!("{}/v1/objects", self.endpoint))
      .json(&object)
      .send()
      .await?;
    Self::check(resp).await?;
    tracing::debug!(event_id = document.event_id, %id, "created remote search object");
    Ok(())
  }

  async fn remove(&self, event_id: i64) -> Result<()> {
    let resp = self.client.delete(self.object_url(event_id)).send().await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(());
    }
    Self::check(resp).await
  }

  /// Attendance is not mirrored; the remote index only serves event search.
  async fn set_attendance(&self, _event_id: i64, _registration_id: i64, _active: bool) -> Result<()> {
    Ok(())
  }
}
