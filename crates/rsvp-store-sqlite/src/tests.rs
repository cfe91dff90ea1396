//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{NaiveDate, NaiveTime, TimeZone as _, Utc};
use rsvp_core::{
  Classify as _, ErrorKind,
  change::{Operation, Position, SourceTable},
  delivery::{DeadLetter, DeadLetterReason},
  model::{EventQuery, NewEvent, NewRegistration, NewUser, RegistrationStatus},
  store::{ChangeLog, DeliveryLedger, RegistrationStore},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn new_user(name: &str) -> NewUser {
  NewUser {
    username:  name.into(),
    email:     format!("{name}@example.com"),
    password:  "correct horse".into(),
    full_name: Some(format!("{name} Example")),
  }
}

fn new_event(title: &str, capacity: Option<i64>) -> NewEvent {
  NewEvent {
    title:       title.into(),
    description: Some(format!("{title} description")),
    category:    None,
    location:    Some("Hall A".into()),
    event_date:  NaiveDate::from_ymd_opt(2026, 11, 5).unwrap(),
    event_time:  NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
    organizer:   Some("Events Team".into()),
    capacity,
  }
}

fn registration(user_id: i64, event_id: i64) -> NewRegistration {
  NewRegistration { user_id, event_id, notes: None }
}

fn core_err(e: Error) -> rsvp_core::Error {
  match e {
    Error::Core(e) => e,
    other => panic!("expected a core error, got {other:?}"),
  }
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn password_is_hashed_and_verifiable() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();

  assert_ne!(user.password_hash, "correct horse");
  assert!(user.password_hash.starts_with("$argon2"));

  let ok = s.authenticate("alice", "correct horse").await.unwrap();
  assert_eq!(ok.map(|u| u.id), Some(user.id));
  assert!(s.authenticate("alice", "wrong password").await.unwrap().is_none());
  assert!(s.authenticate("nobody", "correct horse").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_username_is_a_conflict() {
  let s = store().await;
  s.create_user(new_user("alice")).await.unwrap();

  let err = s.create_user(new_user("alice")).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
  assert!(matches!(core_err(err), rsvp_core::Error::DuplicateUser(_)));
}

#[tokio::test]
async fn malformed_user_is_rejected() {
  let s = store().await;
  let mut input = new_user("bob");
  input.email = "not-an-email".into();
  let err = s.create_user(input).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
}

// ─── Categories and events ───────────────────────────────────────────────────

#[tokio::test]
async fn category_label_resolves_case_insensitively() {
  let s = store().await;
  s.add_category("Workshop".into()).await.unwrap();

  let mut input = new_event("Rust 101", None);
  input.category = Some("workshop".into());
  let event = s.create_event(input).await.unwrap();
  assert_eq!(event.category.as_deref(), Some("Workshop"));

  let mut bad = new_event("Mystery", None);
  bad.category = Some("Séance".into());
  let err = s.create_event(bad).await.unwrap_err();
  assert!(matches!(core_err(err), rsvp_core::Error::UnknownCategory(_)));

  let dup = s.add_category("WORKSHOP".into()).await.unwrap_err();
  assert!(matches!(core_err(dup), rsvp_core::Error::DuplicateCategory(_)));
}

#[tokio::test]
async fn list_events_filters_and_orders() {
  let s = store().await;
  s.add_category("Music".into()).await.unwrap();
  s.add_category("Tech".into()).await.unwrap();

  let mut late = new_event("Evening Jazz", None);
  late.category = Some("Music".into());
  late.event_date = NaiveDate::from_ymd_opt(2026, 12, 1).unwrap();
  s.create_event(late).await.unwrap();

  let mut early = new_event("Rust Meetup", None);
  early.category = Some("Tech".into());
  early.description = Some("talks about jazz-fast code".into());
  s.create_event(early).await.unwrap();

  let all = s.list_events(&EventQuery::default()).await.unwrap();
  let titles: Vec<_> = all.iter().map(|e| e.title.as_str()).collect();
  assert_eq!(titles, ["Rust Meetup", "Evening Jazz"]);

  let music = s
    .list_events(&EventQuery { category: Some("music".into()), search: None })
    .await
    .unwrap();
  assert_eq!(music.len(), 1);

  let jazz = s
    .list_events(&EventQuery { category: Some("all".into()), search: Some("JAZZ".into()) })
    .await
    .unwrap();
  assert_eq!(jazz.len(), 2);
}

#[tokio::test]
async fn update_unknown_event_fails() {
  let s = store().await;
  let err = s.update_event(42, new_event("Ghost", None)).await.unwrap_err();
  assert!(matches!(core_err(err), rsvp_core::Error::UnknownEvent(42)));
}

// ─── Registrations ───────────────────────────────────────────────────────────

#[tokio::test]
async fn register_and_read_details() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();

  let reg = s
    .register(NewRegistration { user_id: user.id, event_id: event.id, notes: Some("veg".into()) })
    .await
    .unwrap();
  assert_eq!(reg.status, RegistrationStatus::Registered);
  assert!(!reg.email_sent);

  let details = s.registration_details(reg.id).await.unwrap().unwrap();
  assert_eq!(details.email, "alice@example.com");
  assert_eq!(details.event_title, "Rust 101");
  assert_eq!(details.notes.as_deref(), Some("veg"));
  assert_eq!(details.recipient_name(), "alice Example");

  let mine = s.user_registrations(user.id).await.unwrap();
  assert_eq!(mine.len(), 1);
  assert_eq!(mine[0].event.id, event.id);
}

#[tokio::test]
async fn register_unknown_user_or_event() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();

  let err = s.register(registration(999, event.id)).await.unwrap_err();
  assert!(matches!(core_err(err), rsvp_core::Error::UnknownUser(999)));

  let err = s.register(registration(user.id, 999)).await.unwrap_err();
  assert!(matches!(core_err(err), rsvp_core::Error::UnknownEvent(999)));
}

#[tokio::test]
async fn concurrent_duplicate_registration_has_one_winner() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();

  let (a, b) = tokio::join!(
    s.register(registration(user.id, event.id)),
    s.register(registration(user.id, event.id)),
  );

  let outcomes = [a, b];
  assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
  let loser = outcomes.into_iter().find_map(Result::err).unwrap();
  assert!(matches!(core_err(loser), rsvp_core::Error::AlreadyRegistered { .. }));
}

#[tokio::test]
async fn capacity_is_enforced() {
  let s = store().await;
  let alice = s.create_user(new_user("alice")).await.unwrap();
  let bob = s.create_user(new_user("bob")).await.unwrap();
  let event = s.create_event(new_event("Tiny", Some(1))).await.unwrap();

  s.register(registration(alice.id, event.id)).await.unwrap();
  let err = s.register(registration(bob.id, event.id)).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
  assert!(matches!(core_err(err), rsvp_core::Error::EventFull(_)));
}

#[tokio::test]
async fn cancel_then_reregister_reactivates() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();

  let reg = s.register(registration(user.id, event.id)).await.unwrap();
  let cancelled = s.cancel(reg.id).await.unwrap();
  assert_eq!(cancelled.status, RegistrationStatus::Cancelled);

  let err = s.cancel(reg.id).await.unwrap_err();
  assert!(matches!(core_err(err), rsvp_core::Error::AlreadyCancelled(_)));

  let again = s.register(registration(user.id, event.id)).await.unwrap();
  assert_eq!(again.id, reg.id);
  assert_eq!(again.status, RegistrationStatus::Registered);

  let err = s.cancel(777).await.unwrap_err();
  assert!(matches!(core_err(err), rsvp_core::Error::RegistrationNotFound(777)));
}

#[tokio::test]
async fn mark_email_sent_keeps_first_timestamp() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();
  let reg = s.register(registration(user.id, event.id)).await.unwrap();

  let first = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap();
  let second = Utc.with_ymd_and_hms(2026, 10, 2, 9, 0, 0).unwrap();
  s.mark_email_sent(reg.id, first).await.unwrap();
  s.mark_email_sent(reg.id, second).await.unwrap();

  let reg = s.get_registration(reg.id).await.unwrap().unwrap();
  assert!(reg.email_sent);
  assert_eq!(reg.email_sent_at, Some(first));

  let err = s.mark_email_sent(999, first).await.unwrap_err();
  assert!(matches!(core_err(err), rsvp_core::Error::RegistrationNotFound(999)));
}

// ─── Change log ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutations_are_logged_with_full_images_in_order() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();
  let reg = s.register(registration(user.id, event.id)).await.unwrap();
  s.cancel(reg.id).await.unwrap();

  let changes = s.read_changes(Position::ZERO, &SourceTable::ALL, 100).await.unwrap();
  assert_eq!(changes.len(), 3);
  assert!(changes.windows(2).all(|w| w[0].position < w[1].position));

  assert_eq!(changes[0].table, SourceTable::Events);
  assert_eq!(changes[0].operation, Operation::Insert);
  let image = changes[0].event_after().unwrap().unwrap();
  assert_eq!(image, event);

  let (before, after) = changes[2].registration_images().unwrap().unwrap();
  assert_eq!(before.unwrap().status, RegistrationStatus::Registered);
  assert_eq!(after.unwrap().status, RegistrationStatus::Cancelled);

  let only_regs = s
    .read_changes(Position::ZERO, &[SourceTable::EventRegistrations], 100)
    .await
    .unwrap();
  assert_eq!(only_regs.len(), 2);

  let tail = s.read_changes(changes[0].position, &SourceTable::ALL, 1).await.unwrap();
  assert_eq!(tail.len(), 1);
  assert_eq!(tail[0].position, changes[1].position);

  assert_eq!(s.head().await.unwrap(), changes[2].position);
}

#[tokio::test]
async fn failed_write_leaves_no_change_record() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();
  s.register(registration(user.id, event.id)).await.unwrap();
  let head = s.head().await.unwrap();

  s.register(registration(user.id, event.id)).await.unwrap_err();
  assert_eq!(s.head().await.unwrap(), head);
}

#[tokio::test]
async fn cascade_delete_is_logged_as_tombstones() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();
  let reg = s.register(registration(user.id, event.id)).await.unwrap();
  let before_delete = s.head().await.unwrap();

  s.delete_event(event.id).await.unwrap();

  assert!(s.get_registration(reg.id).await.unwrap().is_none());
  assert!(
    s.has_tombstone(SourceTable::EventRegistrations, reg.id, before_delete)
      .await
      .unwrap()
  );
  assert!(s.has_tombstone(SourceTable::Events, event.id, before_delete).await.unwrap());
  assert!(
    !s.has_tombstone(SourceTable::Events, event.id, s.head().await.unwrap())
      .await
      .unwrap()
  );
}

// ─── Delivery ledger ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cursor_never_moves_backwards() {
  let s = store().await;
  assert_eq!(s.load_cursor("notify").await.unwrap(), Position::ZERO);

  s.save_cursor("notify", Position(10)).await.unwrap();
  s.save_cursor("notify", Position(4)).await.unwrap();
  assert_eq!(s.load_cursor("notify").await.unwrap(), Position(10));

  s.save_cursor("notify", Position(12)).await.unwrap();
  assert_eq!(s.load_cursor("notify").await.unwrap(), Position(12));
  assert_eq!(s.load_cursor("search-projection").await.unwrap(), Position::ZERO);
}

#[tokio::test]
async fn processed_keys_are_per_consumer() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();
  s.register(registration(user.id, event.id)).await.unwrap();
  let change = s.read_changes(Position::ZERO, &SourceTable::ALL, 10).await.unwrap().remove(1);
  let key = change.dedup_key();

  assert!(!s.is_processed("notify", key).await.unwrap());
  s.mark_processed("notify", key).await.unwrap();
  s.mark_processed("notify", key).await.unwrap();
  assert!(s.is_processed("notify", key).await.unwrap());
  assert!(!s.is_processed("search-projection", key).await.unwrap());
}

#[tokio::test]
async fn processed_keys_are_pruned_once_the_cursor_passes() {
  let s = store().await;
  let user = s.create_user(new_user("alice")).await.unwrap();
  let first = s.create_event(new_event("Rust 101", None)).await.unwrap();
  let second = s.create_event(new_event("Rust 102", None)).await.unwrap();
  s.register(registration(user.id, first.id)).await.unwrap();
  s.register(registration(user.id, second.id)).await.unwrap();
  let changes = s.read_changes(Position::ZERO, &[SourceTable::EventRegistrations], 10).await.unwrap();
  let (early, late) = (changes[0].clone(), changes[1].clone());

  for c in [&early, &late] {
    s.mark_processed("notify", c.dedup_key()).await.unwrap();
    s.mark_processed("search-mirror", c.dedup_key()).await.unwrap();
  }
  s.save_cursor("notify", early.position).await.unwrap();

  assert!(!s.is_processed("notify", early.dedup_key()).await.unwrap());
  assert!(s.is_processed("notify", late.dedup_key()).await.unwrap());
  assert!(s.is_processed("search-mirror", early.dedup_key()).await.unwrap());

  // A stale save keeps pruning against the stored cursor.
  s.save_cursor("notify", Position::ZERO).await.unwrap();
  assert!(s.is_processed("notify", late.dedup_key()).await.unwrap());
  s.save_cursor("notify", late.position).await.unwrap();
  assert!(!s.is_processed("notify", late.dedup_key()).await.unwrap());
}

#[tokio::test]
async fn dead_letters_retire_and_resolve() {
  let s = store().await;
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();
  let change = s.read_changes(Position::ZERO, &SourceTable::ALL, 10).await.unwrap().remove(0);
  assert_eq!(change.row_id, event.id);

  let letter = DeadLetter::new("notify", &change, DeadLetterReason::Exhausted, 5, "relay down");
  let id = letter.dead_letter_id;
  s.record_dead_letter(letter).await.unwrap();

  assert!(s.is_processed("notify", change.dedup_key()).await.unwrap());

  let open = s.list_dead_letters(true).await.unwrap();
  assert_eq!(open.len(), 1);
  assert_eq!(open[0].reason, DeadLetterReason::Exhausted);
  assert_eq!(open[0].attempts, 5);
  assert_eq!(open[0].change, change);

  assert!(s.resolve_dead_letter(id).await.unwrap());
  assert!(!s.resolve_dead_letter(id).await.unwrap());
  assert!(s.list_dead_letters(true).await.unwrap().is_empty());
  assert_eq!(s.list_dead_letters(false).await.unwrap().len(), 1);
}

// ─── Legacy backfill ─────────────────────────────────────────────────────────

#[tokio::test]
async fn backfill_copies_valid_rows_and_reports_the_rest() {
  let s = store().await;
  let alice = s.create_user(new_user("alice")).await.unwrap();
  let bob = s.create_user(new_user("bob")).await.unwrap();
  let event = s.create_event(new_event("Rust 101", None)).await.unwrap();
  s.register(registration(alice.id, event.id)).await.unwrap();

  let date = "2024-05-01T10:00:00+00:00";
  s.insert_legacy_registration(bob.id, Some(event.id), date, "waitlisted").await.unwrap();
  s.insert_legacy_registration(bob.id, None, date, "registered").await.unwrap();
  s.insert_legacy_registration(bob.id, Some(999), date, "registered").await.unwrap();
  s.insert_legacy_registration(alice.id, Some(event.id), date, "registered").await.unwrap();

  let report = s.backfill_legacy_registrations().await.unwrap();
  assert_eq!(report.copied, 1);
  assert_eq!(report.skipped_null_event, 1);
  assert_eq!(report.skipped_orphaned, 1);
  assert_eq!(report.skipped_duplicate, 1);
  assert_eq!(report.skipped_malformed, 0);

  let bobs = s
    .read_changes(Position::ZERO, &[SourceTable::EventRegistrations], 10)
    .await
    .unwrap()
    .into_iter()
    .filter_map(|c| c.registration_images().ok().flatten())
    .filter_map(|(_, after)| after)
    .find(|r| r.user_id == bob.id)
    .unwrap();
  assert_eq!(bobs.status, RegistrationStatus::Waitlist);
  assert!(bobs.email_sent, "historical rows must not trigger confirmations");

  let again = s.backfill_legacy_registrations().await.unwrap();
  assert_eq!(again.copied, 0);
  assert_eq!(again.skipped_duplicate, 2);
}

#[tokio::test]
async fn backfill_normalises_sql_timestamps_and_skips_unreadable_ones() {
  let s = store().await;
  let carol = s.create_user(new_user("carol")).await.unwrap();
  let dave = s.create_user(new_user("dave")).await.unwrap();
  let event = s.create_event(new_event("Rust 102", None)).await.unwrap();

  s.insert_legacy_registration(carol.id, Some(event.id), "2024-05-01 10:00:00", "registered")
    .await
    .unwrap();
  s.insert_legacy_registration(dave.id, Some(event.id), "sometime in May", "registered")
    .await
    .unwrap();

  let report = s.backfill_legacy_registrations().await.unwrap();
  assert_eq!(report.copied, 1);
  assert_eq!(report.skipped_malformed, 1);

  let mine = s.user_registrations(carol.id).await.unwrap();
  assert_eq!(mine.len(), 1);
  assert_eq!(mine[0].registration_date, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());

  let changes = s.read_changes(Position::ZERO, &[SourceTable::EventRegistrations], 10).await.unwrap();
  assert_eq!(changes.len(), 1);
  let (_, after) = changes[0].registration_images().unwrap().unwrap();
  assert_eq!(after.unwrap().user_id, carol.id);
}
