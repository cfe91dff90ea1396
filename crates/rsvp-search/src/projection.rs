//! In-memory search projection over events.
//!
//! The projection is a pure function of the change stream: it holds nothing
//! that cannot be recomputed by replaying the log from position zero, and
//! every write is idempotent so redelivered changes leave it unchanged.

use std::{
  collections::{BTreeSet, HashMap},
  sync::{PoisonError, RwLock},
};

use rsvp_core::search::{EventDocument, SearchIndex};
use serde::{Deserialize, Serialize};

use crate::Result;

// ─── Limits ──────────────────────────────────────────────────────────────────

/// Result-count limits for [`SearchProjection::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
  pub default_limit: usize,
  pub max_limit:     usize,
}

impl Default for SearchLimits {
  fn default() -> Self { Self { default_limit: 6, max_limit: 20 } }
}

impl SearchLimits {
  /// The effective limit for a requested one: the default when absent,
  /// clamped to `1..=max_limit`.
  pub fn clamp(&self, requested: Option<usize>) -> usize {
    requested.unwrap_or(self.default_limit).clamp(1, self.max_limit.max(1))
  }
}

// ─── Hits ────────────────────────────────────────────────────────────────────

/// One ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
  #[serde(flatten)]
  pub event:     EventDocument,
  pub score:     u32,
  /// Number of registrations currently `registered` for the event.
  pub attendees: usize,
}

// ─── Ranking ─────────────────────────────────────────────────────────────────

const TITLE_WEIGHT: u32 = 3;
const CATEGORY_WEIGHT: u32 = 2;
const TEXT_WEIGHT: u32 = 1;

fn tokenize(text: &str) -> Vec<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| !t.is_empty())
    .map(str::to_lowercase)
    .collect()
}

/// Pre-tokenised fields of one document.
#[derive(Debug, Default)]
struct Tokens {
  title:    Vec<String>,
  category: Vec<String>,
  text:     Vec<String>,
}

impl Tokens {
  fn of(doc: &EventDocument) -> Self {
    let mut text = Vec::new();
    for field in [&doc.description, &doc.location, &doc.organizer].into_iter().flatten() {
      text.extend(tokenize(field));
    }
    Self {
      title: tokenize(&doc.title),
      category: doc.category.as_deref().map(tokenize).unwrap_or_default(),
      text,
    }
  }

  /// A query term matches a field token it prefixes.
  fn score(&self, terms: &[String]) -> u32 {
    let hit = |field: &[String], term: &str| field.iter().any(|t| t.starts_with(term));
    terms
      .iter()
      .map(|term| {
        let mut s = 0;
        if hit(&self.title, term) {
          s += TITLE_WEIGHT;
        }
        if hit(&self.category, term) {
          s += CATEGORY_WEIGHT;
        }
        if hit(&self.text, term) {
          s += TEXT_WEIGHT;
        }
        s
      })
      .sum()
  }
}

// ─── Projection ──────────────────────────────────────────────────────────────

struct Entry {
  document: EventDocument,
  tokens:   Tokens,
}

#[derive(Default)]
struct Inner {
  documents:  HashMap<i64, Entry>,
  /// Active registration ids per event. Kept apart from `documents` because
  /// a registration change may be applied before its event's insert.
  attendance: HashMap<i64, BTreeSet<i64>>,
}

/// A queryable, denormalised view of events and their attendance.
#[derive(Default)]
pub struct SearchProjection {
  inner: RwLock<Inner>,
}

impl SearchProjection {
  pub fn new() -> Self { Self::default() }

  /// Drop everything; the next replay from position zero rebuilds it.
  pub fn clear(&self) {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    *inner = Inner::default();
  }

  pub fn len(&self) -> usize {
    self.inner.read().unwrap_or_else(PoisonError::into_inner).documents.len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  pub fn get(&self, event_id: i64) -> Option<EventDocument> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    inner.documents.get(&event_id).map(|e| e.document.clone())
  }

  pub fn attendees(&self, event_id: i64) -> usize {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    inner.attendance.get(&event_id).map_or(0, BTreeSet::len)
  }

  /// Rank events against free text.
  ///
  /// Title matches weigh 3, category 2, description, location and organizer
  /// 1 each; ties fall back to date, time, then id. An empty query lists
  /// every event in date order.
  pub fn query(&self, text: &str, limit: usize) -> Vec<SearchHit> {
    let terms = tokenize(text);
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

    let mut hits: Vec<SearchHit> = inner
      .documents
      .values()
      .filter_map(|entry| {
        let score = entry.tokens.score(&terms);
        (terms.is_empty() || score > 0).then(|| SearchHit {
          event: entry.document.clone(),
          score,
          attendees: inner.attendance.get(&entry.document.event_id).map_or(0, BTreeSet::len),
        })
      })
      .collect();

    hits.sort_by(|a, b| {
      b.score
        .cmp(&a.score)
        .then(a.event.event_date.cmp(&b.event.event_date))
        .then(a.event.event_time.cmp(&b.event.event_time))
        .then(a.event.event_id.cmp(&b.event.event_id))
    });
    hits.truncate(limit);
    hits
  }

  fn apply_upsert(&self, document: EventDocument) {
    let tokens = Tokens::of(&document);
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    inner.documents.insert(document.event_id, Entry { document, tokens });
  }

  fn apply_remove(&self, event_id: i64) {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    inner.documents.remove(&event_id);
    inner.attendance.remove(&event_id);
  }

  fn apply_attendance(&self, event_id: i64, registration_id: i64, active: bool) {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    if active {
      inner.attendance.entry(event_id).or_default().insert(registration_id);
    } else if let Some(set) = inner.attendance.get_mut(&event_id) {
      set.remove(&registration_id);
      if set.is_empty() {
        inner.attendance.remove(&event_id);
      }
    }
  }
}

impl SearchIndex for SearchProjection {
  type Error = crate::Error;

  async fn upsert(&self, document: EventDocument) -> Result<()> {
    self.apply_upsert(document);
    Ok(())
  }

  async fn remove(&self, event_id: i64) -> Result<()> {
    self.apply_remove(event_id);
    Ok(())
  }

  async fn set_attendance(&self, event_id: i64, registration_id: i64, active: bool) -> Result<()> {
    self.apply_attendance(event_id, registration_id, active);
    Ok(())
  }
}
