//! [`SqliteStore`], the SQLite implementation of [`RegistrationStore`].

use std::path::Path;

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use chrono::{DateTime, Utc};
use rand_core::OsRng;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use rsvp_core::{
  model::{
    BackfillReport, Category, Event, EventQuery, NewEvent, NewRegistration, NewUser,
    Registration, RegistrationDetails, User, UserRegistration,
  },
  store::RegistrationStore,
};

use crate::{
  Error, Result,
  encode::{
    DETAILS_COLUMNS, EVENT_COLUMNS, REGISTRATION_COLUMNS, RawDetails, RawEvent, RawRegistration,
    RawUser, USER_COLUMNS, decode_dt, decode_legacy_dt, encode_date, encode_dt, encode_time,
    read_category,
  },
  schema::SCHEMA,
};

/// Result of the domain checks made inside a database closure. The outer
/// `tokio_rusqlite::Result` carries infrastructure failures, this one carries
/// the domain verdict.
type Verdict<T> = std::result::Result<T, rsvp_core::Error>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A registration store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All access
/// is serialised on the connection's thread, and every mutation of a captured
/// table appends its change record in the same transaction.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Cheap round-trip used by readiness probes.
  pub async fn ping(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert a row into the legacy `user_event_registrations` table, with
  /// `registration_date` stored verbatim.
  #[cfg(test)]
  pub(crate) async fn insert_legacy_registration(
    &self,
    user_id: i64,
    event_id: Option<i64>,
    registration_date: &str,
    status: &str,
  ) -> Result<i64> {
    let registration_date = registration_date.to_owned();
    let status = status.to_owned();
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO user_event_registrations (user_id, event_id, registration_date, status)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![user_id, event_id, registration_date, status],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  )
}

fn hash_password(password: &str) -> Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|h| h.to_string())
    .map_err(|e| Error::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, phc: &str) -> bool {
  PasswordHash::new(phc)
    .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
    .is_ok()
}

/// Resolve a free-text category label to the canonical category name.
/// Matching is case-insensitive (the column collates NOCASE).
fn resolve_category(
  conn: &rusqlite::Connection,
  label: Option<&str>,
) -> rusqlite::Result<Verdict<Option<String>>> {
  let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
    return Ok(Ok(None));
  };
  let name: Option<String> = conn
    .query_row(
      "SELECT name FROM dcategories WHERE name = ?1",
      rusqlite::params![label],
      |r| r.get(0),
    )
    .optional()?;
  Ok(name.map(Some).ok_or_else(|| rsvp_core::Error::UnknownCategory(label.to_owned())))
}

fn select_event(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<RawEvent>> {
  conn
    .query_row(
      &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
      rusqlite::params![id],
      RawEvent::read,
    )
    .optional()
}

fn select_registration(
  conn: &rusqlite::Connection,
  id: i64,
) -> rusqlite::Result<Option<RawRegistration>> {
  conn
    .query_row(
      &format!("SELECT {REGISTRATION_COLUMNS} FROM event_registrations WHERE id = ?1"),
      rusqlite::params![id],
      RawRegistration::read,
    )
    .optional()
}

fn exists(conn: &rusqlite::Connection, sql: &str, id: i64) -> rusqlite::Result<bool> {
  Ok(conn.query_row(sql, rusqlite::params![id], |_| Ok(())).optional()?.is_some())
}

/// `Err(EventFull)` when the event has a capacity and it is used up.
fn check_capacity(
  conn: &rusqlite::Connection,
  event_id: i64,
  capacity: Option<i64>,
) -> rusqlite::Result<Verdict<()>> {
  let Some(capacity) = capacity else {
    return Ok(Ok(()));
  };
  let taken: i64 = conn.query_row(
    "SELECT COUNT(*) FROM event_registrations WHERE event_id = ?1 AND status = 'registered'",
    rusqlite::params![event_id],
    |r| r.get(0),
  )?;
  if taken >= capacity {
    return Ok(Err(rsvp_core::Error::EventFull(event_id)));
  }
  Ok(Ok(()))
}

/// Map legacy status labels onto the canonical set.
fn normalise_legacy_status(status: &str) -> &'static str {
  match status.trim().to_ascii_lowercase().as_str() {
    "cancelled" | "canceled" => "cancelled",
    "waitlist" | "waitlisted" => "waitlist",
    _ => "registered",
  }
}

// ─── RegistrationStore impl ──────────────────────────────────────────────────

impl RegistrationStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn create_user(&self, input: NewUser) -> Result<User> {
    input.validate()?;

    let password = input.password;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
      .await
      .map_err(|e| Error::PasswordHash(e.to_string()))??;

    let username  = input.username.trim().to_owned();
    let email     = input.email.trim().to_ascii_lowercase();
    let full_name = input.full_name;
    let now       = encode_dt(Utc::now());

    let verdict: Verdict<RawUser> = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO users (username, email, password, full_name, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
          rusqlite::params![username, email, hash, full_name, now],
        );
        match inserted {
          Ok(_) => {}
          Err(e) if is_unique_violation(&e) => {
            return Ok(Err(rsvp_core::Error::DuplicateUser(format!("{username} / {email}"))));
          }
          Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();
        let raw = conn.query_row(
          &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
          rusqlite::params![id],
          RawUser::read,
        )?;
        Ok(Ok(raw))
      })
      .await?;

    verdict?.into_user()
  }

  async fn get_user(&self, id: i64) -> Result<Option<User>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
              rusqlite::params![id],
              RawUser::read,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
    let name = username.trim().to_owned();
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
              rusqlite::params![name],
              RawUser::read,
            )
            .optional()?,
        )
      })
      .await?;

    let Some(user) = raw.map(RawUser::into_user).transpose()? else {
      return Ok(None);
    };

    let password = password.to_owned();
    let phc = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &phc))
      .await
      .map_err(|e| Error::PasswordHash(e.to_string()))?;

    Ok(verified.then_some(user))
  }

  // ── Categories ────────────────────────────────────────────────────────────

  async fn add_category(&self, name: String) -> Result<Category> {
    let name = name.trim().to_owned();
    if name.is_empty() {
      return Err(rsvp_core::Error::Invalid("category name is required".into()).into());
    }

    let verdict: Verdict<Category> = self
      .conn
      .call(move |conn| {
        match conn.execute("INSERT INTO dcategories (name) VALUES (?1)", rusqlite::params![name]) {
          Ok(_) => Ok(Ok(Category { id: conn.last_insert_rowid(), name })),
          Err(e) if is_unique_violation(&e) => Ok(Err(rsvp_core::Error::DuplicateCategory(name))),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    Ok(verdict?)
  }

  async fn list_categories(&self) -> Result<Vec<Category>> {
    let categories = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT id, name FROM dcategories ORDER BY name ASC")?;
        let rows = stmt.query_map([], read_category)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(categories)
  }

  // ── Events ────────────────────────────────────────────────────────────────

  async fn create_event(&self, input: NewEvent) -> Result<Event> {
    input.validate()?;
    let now = encode_dt(Utc::now());

    let verdict: Verdict<RawEvent> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let category = match resolve_category(&tx, input.category.as_deref())? {
          Ok(c) => c,
          Err(e) => return Ok(Err(e)),
        };
        tx.execute(
          "INSERT INTO events (title, description, category, location, event_date, event_time,
                               organizer, capacity, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
          rusqlite::params![
            input.title.trim(),
            input.description,
            category,
            input.location,
            encode_date(input.event_date),
            encode_time(input.event_time),
            input.organizer,
            input.capacity,
            now,
          ],
        )?;
        let id = tx.last_insert_rowid();
        let raw = select_event(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Ok(raw))
      })
      .await?;

    verdict?.into_event()
  }

  async fn get_event(&self, id: i64) -> Result<Option<Event>> {
    let raw = self.conn.call(move |conn| Ok(select_event(conn, id)?)).await?;
    raw.map(RawEvent::into_event).transpose()
  }

  async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
    let category = query
      .category
      .as_deref()
      .map(str::trim)
      .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("all"))
      .map(|c| format!("%{c}%"));
    let search = query
      .search
      .as_deref()
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(|s| format!("%{s}%"));

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM events
           WHERE (?1 IS NULL OR category LIKE ?1)
             AND (?2 IS NULL OR title LIKE ?2 OR description LIKE ?2)
           ORDER BY event_date, event_time, id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![category, search], RawEvent::read)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn update_event(&self, id: i64, input: NewEvent) -> Result<Event> {
    input.validate()?;
    let now = encode_dt(Utc::now());

    let verdict: Verdict<RawEvent> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !exists(&tx, "SELECT 1 FROM events WHERE id = ?1", id)? {
          return Ok(Err(rsvp_core::Error::UnknownEvent(id)));
        }
        let category = match resolve_category(&tx, input.category.as_deref())? {
          Ok(c) => c,
          Err(e) => return Ok(Err(e)),
        };
        tx.execute(
          "UPDATE events
           SET title = ?2, description = ?3, category = ?4, location = ?5, event_date = ?6,
               event_time = ?7, organizer = ?8, capacity = ?9, updated_at = ?10
           WHERE id = ?1",
          rusqlite::params![
            id,
            input.title.trim(),
            input.description,
            category,
            input.location,
            encode_date(input.event_date),
            encode_time(input.event_time),
            input.organizer,
            input.capacity,
            now,
          ],
        )?;
        let raw = select_event(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Ok(raw))
      })
      .await?;

    verdict?.into_event()
  }

  async fn delete_event(&self, id: i64) -> Result<()> {
    let deleted = self
      .conn
      .call(move |conn| Ok(conn.execute("DELETE FROM events WHERE id = ?1", rusqlite::params![id])?))
      .await?;
    if deleted == 0 {
      return Err(rsvp_core::Error::UnknownEvent(id).into());
    }
    Ok(())
  }

  // ── Registrations ─────────────────────────────────────────────────────────

  async fn register(&self, input: NewRegistration) -> Result<Registration> {
    let NewRegistration { user_id, event_id, notes } = input;
    let now = encode_dt(Utc::now());

    let verdict: Verdict<RawRegistration> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !exists(&tx, "SELECT 1 FROM users WHERE id = ?1", user_id)? {
          return Ok(Err(rsvp_core::Error::UnknownUser(user_id)));
        }
        let capacity: Option<Option<i64>> = tx
          .query_row(
            "SELECT capacity FROM events WHERE id = ?1",
            rusqlite::params![event_id],
            |r| r.get(0),
          )
          .optional()?;
        let Some(capacity) = capacity else {
          return Ok(Err(rsvp_core::Error::UnknownEvent(event_id)));
        };

        let existing: Option<(i64, String)> = tx
          .query_row(
            "SELECT id, status FROM event_registrations WHERE user_id = ?1 AND event_id = ?2",
            rusqlite::params![user_id, event_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;

        let id = match existing {
          Some((id, status)) if status == "cancelled" => {
            if let Err(e) = check_capacity(&tx, event_id, capacity)? {
              return Ok(Err(e));
            }
            tx.execute(
              "UPDATE event_registrations
               SET status = 'registered', registration_date = ?2, updated_at = ?2,
                   notes = COALESCE(?3, notes)
               WHERE id = ?1",
              rusqlite::params![id, now, notes],
            )?;
            id
          }
          Some(_) => {
            return Ok(Err(rsvp_core::Error::AlreadyRegistered { user_id, event_id }));
          }
          None => {
            if let Err(e) = check_capacity(&tx, event_id, capacity)? {
              return Ok(Err(e));
            }
            let inserted = tx.execute(
              "INSERT INTO event_registrations
                 (user_id, event_id, registration_date, status, email_sent, notes, created_at, updated_at)
               VALUES (?1, ?2, ?3, 'registered', 0, ?4, ?3, ?3)",
              rusqlite::params![user_id, event_id, now, notes],
            );
            match inserted {
              Ok(_) => tx.last_insert_rowid(),
              // The constraint, not the lookup above, is what decides a race.
              Err(e) if is_unique_violation(&e) => {
                return Ok(Err(rsvp_core::Error::AlreadyRegistered { user_id, event_id }));
              }
              Err(e) => return Err(e.into()),
            }
          }
        };

        let raw = select_registration(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Ok(raw))
      })
      .await?;

    let registration = verdict?.into_registration()?;
    tracing::debug!(
      registration_id = registration.id,
      user_id,
      event_id,
      "registration recorded"
    );
    Ok(registration)
  }

  async fn cancel(&self, registration_id: i64) -> Result<Registration> {
    let now = encode_dt(Utc::now());

    let verdict: Verdict<RawRegistration> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let status: Option<String> = tx
          .query_row(
            "SELECT status FROM event_registrations WHERE id = ?1",
            rusqlite::params![registration_id],
            |r| r.get(0),
          )
          .optional()?;
        match status.as_deref() {
          None => return Ok(Err(rsvp_core::Error::RegistrationNotFound(registration_id))),
          Some("cancelled") => return Ok(Err(rsvp_core::Error::AlreadyCancelled(registration_id))),
          Some(_) => {}
        }
        tx.execute(
          "UPDATE event_registrations SET status = 'cancelled', updated_at = ?2 WHERE id = ?1",
          rusqlite::params![registration_id, now],
        )?;
        let raw = select_registration(&tx, registration_id)?
          .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Ok(raw))
      })
      .await?;

    verdict?.into_registration()
  }

  async fn mark_email_sent(&self, registration_id: i64, at: DateTime<Utc>) -> Result<()> {
    let at = encode_dt(at);

    let verdict: Verdict<()> = self
      .conn
      .call(move |conn| {
        let updated = conn.execute(
          "UPDATE event_registrations
           SET email_sent = 1, email_sent_at = ?2, updated_at = ?2
           WHERE id = ?1 AND email_sent = 0",
          rusqlite::params![registration_id, at],
        )?;
        if updated == 0
          && !exists(conn, "SELECT 1 FROM event_registrations WHERE id = ?1", registration_id)?
        {
          return Ok(Err(rsvp_core::Error::RegistrationNotFound(registration_id)));
        }
        Ok(Ok(()))
      })
      .await?;

    Ok(verdict?)
  }

  async fn get_registration(&self, id: i64) -> Result<Option<Registration>> {
    let raw = self.conn.call(move |conn| Ok(select_registration(conn, id)?)).await?;
    raw.map(RawRegistration::into_registration).transpose()
  }

  async fn registration_details(&self, registration_id: i64) -> Result<Option<RegistrationDetails>> {
    let raw: Option<RawDetails> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {DETAILS_COLUMNS} FROM registration_details WHERE registration_id = ?1"
              ),
              rusqlite::params![registration_id],
              RawDetails::read,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDetails::into_details).transpose()
  }

  async fn user_registrations(&self, user_id: i64) -> Result<Vec<UserRegistration>> {
    let raws: Vec<(RawEvent, i64, String, Option<String>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT e.id, e.title, e.description, e.category, e.location, e.event_date,
                  e.event_time, e.organizer, e.capacity, e.created_at, e.updated_at,
                  r.id, r.registration_date, r.notes
           FROM event_registrations r
           JOIN events e ON e.id = r.event_id
           WHERE r.user_id = ?1 AND r.status = 'registered'
           ORDER BY e.event_date ASC, e.event_time ASC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], |row| {
            Ok((RawEvent::read_at(row, 0)?, row.get(11)?, row.get(12)?, row.get(13)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(event, registration_id, registration_date, notes)| -> Result<UserRegistration> {
        Ok(UserRegistration {
          event: event.into_event()?,
          registration_id,
          registration_date: decode_dt(&registration_date)?,
          notes,
        })
      })
      .collect()
  }

  async fn backfill_legacy_registrations(&self) -> Result<BackfillReport> {
    let now = encode_dt(Utc::now());

    let report = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let legacy: Vec<(i64, Option<i64>, String, String, Option<String>)> = {
          let mut stmt = tx.prepare(
            "SELECT user_id, event_id, registration_date, status, notes
             FROM user_event_registrations ORDER BY id",
          )?;
          stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut report = BackfillReport::default();
        for (user_id, event_id, registration_date, status, notes) in legacy {
          let Some(event_id) = event_id else {
            report.skipped_null_event += 1;
            continue;
          };
          let Some(registration_date) = decode_legacy_dt(&registration_date) else {
            tracing::warn!(user_id, event_id, registration_date, "unreadable legacy registration date");
            report.skipped_malformed += 1;
            continue;
          };
          if !exists(&tx, "SELECT 1 FROM users WHERE id = ?1", user_id)?
            || !exists(&tx, "SELECT 1 FROM events WHERE id = ?1", event_id)?
          {
            report.skipped_orphaned += 1;
            continue;
          }
          // Historical rows: their confirmations are not re-sent.
          let inserted = tx.execute(
            "INSERT INTO event_registrations
               (user_id, event_id, registration_date, status, email_sent, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
            rusqlite::params![
              user_id,
              event_id,
              encode_dt(registration_date),
              normalise_legacy_status(&status),
              notes,
              now,
            ],
          );
          match inserted {
            Ok(_) => report.copied += 1,
            Err(e) if is_unique_violation(&e) => report.skipped_duplicate += 1,
            Err(e) => return Err(e.into()),
          }
        }
        tx.commit()?;
        Ok(report)
      })
      .await?;

    tracing::info!(
      copied = report.copied,
      skipped_null_event = report.skipped_null_event,
      skipped_orphaned = report.skipped_orphaned,
      skipped_duplicate = report.skipped_duplicate,
      skipped_malformed = report.skipped_malformed,
      "legacy registrations backfilled"
    );
    Ok(report)
  }
}
