//! Database schema definitions.
//!
//! One table per record kind (plus the activity report side table), all keyed
//! by `unique_id` with a `(generation_time, unique_id)` index backing the
//! range retrievals. Timestamps are microsecond integers; state enums are
//! lowercase text; opaque payloads are blobs; structured values are JSON text.

use rusqlite::Connection;

use crate::error::ArchiveError;

/// Telemetry parameter samples.
pub const PARAMETERS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS parameters (
    unique_id        INTEGER PRIMARY KEY,
    generation_time  INTEGER NOT NULL,
    external_id      INTEGER NOT NULL,
    name             TEXT NOT NULL,
    path             TEXT NOT NULL,
    eng_value        TEXT,
    raw_value        TEXT,
    reception_time   INTEGER NOT NULL,
    route            TEXT,
    validity         TEXT NOT NULL,
    alarm_state      TEXT NOT NULL,
    extension        BLOB
);
CREATE INDEX IF NOT EXISTS parameters_time_idx ON parameters (generation_time, unique_id);
CREATE INDEX IF NOT EXISTS parameters_path_idx ON parameters (path, generation_time);
"#;

/// Raw transport frames.
pub const RAW_DATA_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_data (
    unique_id        INTEGER PRIMARY KEY,
    generation_time  INTEGER NOT NULL,
    name             TEXT NOT NULL,
    reception_time   INTEGER NOT NULL,
    type             TEXT NOT NULL,
    route            TEXT NOT NULL,
    source           TEXT NOT NULL,
    quality          TEXT NOT NULL,
    contents         BLOB,
    extension        BLOB
);
CREATE INDEX IF NOT EXISTS raw_data_time_idx ON raw_data (generation_time, unique_id);
"#;

/// Onboard and ground events.
pub const EVENTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    unique_id        INTEGER PRIMARY KEY,
    generation_time  INTEGER NOT NULL,
    external_id      INTEGER NOT NULL,
    name             TEXT NOT NULL,
    path             TEXT NOT NULL,
    qualifier        TEXT,
    reception_time   INTEGER NOT NULL,
    type             TEXT NOT NULL,
    route            TEXT,
    source           TEXT,
    severity         TEXT NOT NULL,
    extension        BLOB
);
CREATE INDEX IF NOT EXISTS events_time_idx ON events (generation_time, unique_id);
"#;

/// Parameter alarm transitions.
pub const ALARMS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS alarms (
    unique_id                 INTEGER PRIMARY KEY,
    generation_time           INTEGER NOT NULL,
    external_id               INTEGER NOT NULL,
    name                      TEXT NOT NULL,
    path                      TEXT NOT NULL,
    current_alarm_state       TEXT NOT NULL,
    current_value             TEXT,
    reception_time            INTEGER NOT NULL,
    last_nominal_value        TEXT,
    last_nominal_value_time   INTEGER,
    extension                 BLOB
);
CREATE INDEX IF NOT EXISTS alarms_time_idx ON alarms (generation_time, unique_id);
CREATE INDEX IF NOT EXISTS alarms_path_idx ON alarms (path, generation_time);
"#;

/// Operator messages.
pub const MESSAGES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    unique_id        INTEGER PRIMARY KEY,
    generation_time  INTEGER NOT NULL,
    msg_id           TEXT NOT NULL,
    text             TEXT NOT NULL,
    source           TEXT,
    severity         TEXT NOT NULL,
    linked_entity_id INTEGER,
    extension        BLOB
);
CREATE INDEX IF NOT EXISTS messages_time_idx ON messages (generation_time, unique_id);
"#;

/// Message acknowledgement state, one row per acknowledgement entity.
pub const ACK_MESSAGES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ack_messages (
    unique_id            INTEGER PRIMARY KEY,
    generation_time      INTEGER NOT NULL,
    message_id           INTEGER NOT NULL,
    state                TEXT NOT NULL,
    user_name            TEXT,
    acknowledgement_time INTEGER,
    extension            BLOB
);
CREATE INDEX IF NOT EXISTS ack_messages_time_idx ON ack_messages (generation_time, unique_id);
"#;

/// Activity occurrences (one durable row per occurrence).
pub const ACTIVITY_OCCURRENCES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS activity_occurrences (
    unique_id        INTEGER PRIMARY KEY,
    generation_time  INTEGER NOT NULL,
    external_id      INTEGER NOT NULL,
    name             TEXT NOT NULL,
    path             TEXT NOT NULL,
    type             TEXT NOT NULL,
    route            TEXT NOT NULL,
    source           TEXT NOT NULL,
    arguments        TEXT NOT NULL,
    properties       TEXT NOT NULL,
    extension        BLOB
);
CREATE INDEX IF NOT EXISTS activity_occurrences_time_idx
    ON activity_occurrences (generation_time, unique_id);
"#;

/// Activity progress reports (N rows per occurrence, foreign-keyed by id).
pub const ACTIVITY_REPORTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS activity_reports (
    unique_id              INTEGER PRIMARY KEY,
    generation_time        INTEGER NOT NULL,
    name                   TEXT NOT NULL,
    execution_time         INTEGER,
    state                  TEXT NOT NULL,
    transition             TEXT NOT NULL,
    status                 TEXT NOT NULL,
    result                 TEXT,
    activity_occurrence_id INTEGER NOT NULL,
    extension              BLOB
);
CREATE INDEX IF NOT EXISTS activity_reports_occurrence_idx
    ON activity_reports (activity_occurrence_id, generation_time, unique_id);
"#;

/// Scheduled activities, one row per schedule entry.
pub const SCHEDULED_ACTIVITIES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS scheduled_activities (
    unique_id              INTEGER PRIMARY KEY,
    generation_time        INTEGER NOT NULL,
    request                TEXT NOT NULL,
    path                   TEXT NOT NULL,
    activity_occurrence    INTEGER,
    resources              TEXT NOT NULL,
    source                 TEXT NOT NULL,
    external_id            INTEGER NOT NULL,
    trigger_info           TEXT,
    latest_invocation_time INTEGER,
    conflict_strategy      TEXT NOT NULL,
    state                  TEXT NOT NULL,
    extension              BLOB
);
CREATE INDEX IF NOT EXISTS scheduled_activities_time_idx
    ON scheduled_activities (generation_time, unique_id);
"#;

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist; safe to run against an
/// already populated archive.
pub fn init_schema(conn: &Connection) -> Result<(), ArchiveError> {
    conn.execute_batch(PARAMETERS_TABLE_DDL)?;
    conn.execute_batch(RAW_DATA_TABLE_DDL)?;
    conn.execute_batch(EVENTS_TABLE_DDL)?;
    conn.execute_batch(ALARMS_TABLE_DDL)?;
    conn.execute_batch(MESSAGES_TABLE_DDL)?;
    conn.execute_batch(ACK_MESSAGES_TABLE_DDL)?;
    conn.execute_batch(ACTIVITY_OCCURRENCES_TABLE_DDL)?;
    conn.execute_batch(ACTIVITY_REPORTS_TABLE_DDL)?;
    conn.execute_batch(SCHEDULED_ACTIVITIES_TABLE_DDL)?;

    tracing::info!("archive schema initialized");
    Ok(())
}
