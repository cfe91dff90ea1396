//! SQL schema for the rsvp SQLite store.
//!
//! Executed once at connection startup. Every statement is idempotent, so
//! reopening an existing file is safe. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Entities ────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL UNIQUE,
    email       TEXT NOT NULL UNIQUE,
    password    TEXT NOT NULL,            -- argon2 PHC string, never plaintext
    full_name   TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dcategories (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    title        TEXT NOT NULL,
    description  TEXT,
    category     TEXT,                    -- label, resolved against dcategories on write
    location     TEXT,
    event_date   TEXT NOT NULL,           -- YYYY-MM-DD
    event_time   TEXT NOT NULL,           -- HH:MM:SS
    organizer    TEXT,
    capacity     INTEGER CHECK (capacity IS NULL OR capacity > 0),
    created_at   TEXT NOT NULL,
    updated_at   TEXT
);

CREATE TABLE IF NOT EXISTS event_registrations (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id            INTEGER NOT NULL REFERENCES users(id)  ON DELETE CASCADE,
    event_id           INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    registration_date  TEXT NOT NULL,
    status             TEXT NOT NULL DEFAULT 'registered'
                       CHECK (status IN ('registered', 'cancelled', 'waitlist')),
    email_sent         INTEGER NOT NULL DEFAULT 0,
    email_sent_at      TEXT,
    notes              TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    UNIQUE (user_id, event_id)
);

-- Legacy duplicate of event_registrations. Read only by the backfill job;
-- note the nullable, unreferenced event_id.
CREATE TABLE IF NOT EXISTS user_event_registrations (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id            INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    event_id           INTEGER,
    registration_date  TEXT NOT NULL,
    status             TEXT NOT NULL DEFAULT 'registered',
    notes              TEXT
);

CREATE VIEW IF NOT EXISTS registration_details AS
SELECT
    r.id                 AS registration_id,
    r.status             AS status,
    r.registration_date  AS registration_date,
    r.email_sent         AS email_sent,
    r.email_sent_at      AS email_sent_at,
    r.notes              AS notes,
    u.id                 AS user_id,
    u.username           AS username,
    u.email              AS email,
    u.full_name          AS full_name,
    e.id                 AS event_id,
    e.title              AS event_title,
    e.description        AS event_description,
    e.category           AS event_category,
    e.location           AS event_location,
    e.event_date         AS event_date,
    e.event_time         AS event_time,
    e.organizer          AS organizer
FROM event_registrations r
JOIN users  u ON u.id = r.user_id
JOIN events e ON e.id = r.event_id;

CREATE INDEX IF NOT EXISTS registrations_event_idx ON event_registrations(event_id, status);
CREATE INDEX IF NOT EXISTS events_date_idx         ON events(event_date, event_time);

-- ── Change capture ──────────────────────────────────────────────────────────

-- Append-only. Rows are written by the triggers below in the same
-- transaction as the mutation they describe; position is the commit order.
CREATE TABLE IF NOT EXISTS change_log (
    position      INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name    TEXT NOT NULL,
    row_id        INTEGER NOT NULL,
    operation     TEXT NOT NULL CHECK (operation IN ('insert', 'update', 'delete')),
    before_json   TEXT,
    after_json    TEXT,
    committed_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS change_log_row_idx ON change_log(table_name, row_id, position);

CREATE TRIGGER IF NOT EXISTS events_capture_insert AFTER INSERT ON events
BEGIN
    INSERT INTO change_log (table_name, row_id, operation, before_json, after_json, committed_at)
    VALUES ('events', NEW.id, 'insert', NULL,
            json_object('id', NEW.id, 'title', NEW.title, 'description', NEW.description,
                        'category', NEW.category, 'location', NEW.location,
                        'event_date', NEW.event_date, 'event_time', NEW.event_time,
                        'organizer', NEW.organizer, 'capacity', NEW.capacity,
                        'created_at', NEW.created_at, 'updated_at', NEW.updated_at),
            strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS events_capture_update AFTER UPDATE ON events
BEGIN
    INSERT INTO change_log (table_name, row_id, operation, before_json, after_json, committed_at)
    VALUES ('events', NEW.id, 'update',
            json_object('id', OLD.id, 'title', OLD.title, 'description', OLD.description,
                        'category', OLD.category, 'location', OLD.location,
                        'event_date', OLD.event_date, 'event_time', OLD.event_time,
                        'organizer', OLD.organizer, 'capacity', OLD.capacity,
                        'created_at', OLD.created_at, 'updated_at', OLD.updated_at),
            json_object('id', NEW.id, 'title', NEW.title, 'description', NEW.description,
                        'category', NEW.category, 'location', NEW.location,
                        'event_date', NEW.event_date, 'event_time', NEW.event_time,
                        'organizer', NEW.organizer, 'capacity', NEW.capacity,
                        'created_at', NEW.created_at, 'updated_at', NEW.updated_at),
            strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS events_capture_delete AFTER DELETE ON events
BEGIN
    INSERT INTO change_log (table_name, row_id, operation, before_json, after_json, committed_at)
    VALUES ('events', OLD.id, 'delete',
            json_object('id', OLD.id, 'title', OLD.title, 'description', OLD.description,
                        'category', OLD.category, 'location', OLD.location,
                        'event_date', OLD.event_date, 'event_time', OLD.event_time,
                        'organizer', OLD.organizer, 'capacity', OLD.capacity,
                        'created_at', OLD.created_at, 'updated_at', OLD.updated_at),
            NULL,
            strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS registrations_capture_insert AFTER INSERT ON event_registrations
BEGIN
    INSERT INTO change_log (table_name, row_id, operation, before_json, after_json, committed_at)
    VALUES ('event_registrations', NEW.id, 'insert', NULL,
            json_object('id', NEW.id, 'user_id', NEW.user_id, 'event_id', NEW.event_id,
                        'registration_date', NEW.registration_date, 'status', NEW.status,
                        'email_sent', json(CASE WHEN NEW.email_sent THEN 'true' ELSE 'false' END),
                        'email_sent_at', NEW.email_sent_at, 'notes', NEW.notes,
                        'created_at', NEW.created_at, 'updated_at', NEW.updated_at),
            strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS registrations_capture_update AFTER UPDATE ON event_registrations
BEGIN
    INSERT INTO change_log (table_name, row_id, operation, before_json, after_json, committed_at)
    VALUES ('event_registrations', NEW.id, 'update',
            json_object('id', OLD.id, 'user_id', OLD.user_id, 'event_id', OLD.event_id,
                        'registration_date', OLD.registration_date, 'status', OLD.status,
                        'email_sent', json(CASE WHEN OLD.email_sent THEN 'true' ELSE 'false' END),
                        'email_sent_at', OLD.email_sent_at, 'notes', OLD.notes,
                        'created_at', OLD.created_at, 'updated_at', OLD.updated_at),
            json_object('id', NEW.id, 'user_id', NEW.user_id, 'event_id', NEW.event_id,
                        'registration_date', NEW.registration_date, 'status', NEW.status,
                        'email_sent', json(CASE WHEN NEW.email_sent THEN 'true' ELSE 'false' END),
                        'email_sent_at', NEW.email_sent_at, 'notes', NEW.notes,
                        'created_at', NEW.created_at, 'updated_at', NEW.updated_at),
            strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS registrations_capture_delete AFTER DELETE ON event_registrations
BEGIN
    INSERT INTO change_log (table_name, row_id, operation, before_json, after_json, committed_at)
    VALUES ('event_registrations', OLD.id, 'delete',
            json_object('id', OLD.id, 'user_id', OLD.user_id, 'event_id', OLD.event_id,
                        'registration_date', OLD.registration_date, 'status', OLD.status,
                        'email_sent', json(CASE WHEN OLD.email_sent THEN 'true' ELSE 'false' END),
                        'email_sent_at', OLD.email_sent_at, 'notes', OLD.notes,
                        'created_at', OLD.created_at, 'updated_at', OLD.updated_at),
            NULL,
            strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

-- ── Delivery ledger ─────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS consumer_cursors (
    consumer    TEXT PRIMARY KEY,
    position    INTEGER NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processed_changes (
    consumer      TEXT NOT NULL,
    table_name    TEXT NOT NULL,
    row_id        INTEGER NOT NULL,
    operation     TEXT NOT NULL,
    position      INTEGER NOT NULL,
    processed_at  TEXT NOT NULL,
    PRIMARY KEY (consumer, table_name, row_id, operation, position)
);

CREATE INDEX IF NOT EXISTS processed_changes_by_position
    ON processed_changes (consumer, position);

CREATE TABLE IF NOT EXISTS dead_letters (
    dead_letter_id  TEXT PRIMARY KEY,
    consumer        TEXT NOT NULL,
    position        INTEGER NOT NULL,
    table_name      TEXT NOT NULL,
    row_id          INTEGER NOT NULL,
    operation       TEXT NOT NULL,
    reason          TEXT NOT NULL,        -- 'exhausted' | 'permanent' | 'corruption'
    attempts        INTEGER NOT NULL,
    last_error      TEXT NOT NULL,
    change_json     TEXT NOT NULL,
    recorded_at     TEXT NOT NULL,
    resolved_at     TEXT
);

CREATE INDEX IF NOT EXISTS dead_letters_open_idx ON dead_letters(resolved_at, recorded_at);

PRAGMA user_version = 1;
";
