//! Core types shared by every record kind.
//!
//! This module defines the identity and ordering primitives of the archive:
//!
//! - [`UniqueId`]: per-kind 64-bit record identity, primary key and tiebreaker
//! - [`RetrievalDirection`]: time-ordered retrieval direction
//! - [`DebugInformation`]: instrumentation snapshot entry
//! - shared state enums persisted as lowercase text columns
//!
//! Timestamps are `chrono` UTC instants persisted as microsecond integers.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::ArchiveError;

// =============================================================================
// Identity
// =============================================================================

/// Record identity: process-wide monotonically assigned per kind, set by the
/// producing subsystem at creation time. Primary key and ordering tiebreaker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UniqueId(pub i64);

impl UniqueId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UniqueId {
    fn from(v: i64) -> Self {
        UniqueId(v)
    }
}

impl ToSql for UniqueId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for UniqueId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(UniqueId)
    }
}

// =============================================================================
// Time codec
// =============================================================================

/// Lower clamp bound for query timestamps (the epoch).
pub const MIN_TIME_MICROS: i64 = 0;

/// Upper clamp bound for query timestamps: epoch + 1000 years.
pub const MAX_TIME_MICROS: i64 = 1000 * 365 * 24 * 3600 * 1_000_000;

/// Convert an instant to its persisted microsecond representation.
pub fn to_micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

/// Convert a persisted microsecond value back to an instant.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Clamp a query timestamp into the supported range before it reaches SQL.
pub fn clamp_micros(t: DateTime<Utc>) -> i64 {
    to_micros(t).clamp(MIN_TIME_MICROS, MAX_TIME_MICROS)
}

// =============================================================================
// Retrieval direction
// =============================================================================

/// Direction of a time-anchored retrieval or purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RetrievalDirection {
    /// Ascending from the anchor (`generation_time >= start`).
    ToFuture,
    /// Descending from the anchor (`generation_time <= start`).
    ToPast,
}

impl RetrievalDirection {
    /// Comparison operator for the time anchor predicate.
    pub(crate) fn time_op(self) -> &'static str {
        match self {
            RetrievalDirection::ToFuture => ">=",
            RetrievalDirection::ToPast => "<=",
        }
    }

    /// Strict comparison operator (tie-aware pagination, purge).
    pub(crate) fn strict_op(self) -> &'static str {
        match self {
            RetrievalDirection::ToFuture => ">",
            RetrievalDirection::ToPast => "<",
        }
    }

    /// SQL sort keyword matching the direction.
    pub(crate) fn order(self) -> &'static str {
        match self {
            RetrievalDirection::ToFuture => "ASC",
            RetrievalDirection::ToPast => "DESC",
        }
    }
}

// =============================================================================
// Instrumentation
// =============================================================================

/// One instrumentation gauge published by an archive instance.
///
/// Snapshots are refreshed by the per-kind sampler and pulled by an external
/// collector through `current_debug_info()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugInformation {
    /// Owning subsystem (always the archive name).
    pub system: String,
    /// Gauge label, e.g. `"raw data archive input queue"`.
    pub name: String,
    /// Current gauge value.
    pub measure: i64,
    /// Upper bound of the gauge, when one exists.
    pub maximum: Option<i64>,
    /// Unit of measure; empty for plain counts.
    pub unit: &'static str,
}

impl DebugInformation {
    pub fn of(
        system: &str,
        name: String,
        measure: i64,
        maximum: Option<i64>,
        unit: &'static str,
    ) -> Self {
        DebugInformation {
            system: system.to_string(),
            name,
            measure,
            maximum,
            unit,
        }
    }
}

// =============================================================================
// Record trait
// =============================================================================

/// Common surface of every archived record.
pub trait ArchiveItem: Clone + PartialEq + Send + Sync + 'static {
    /// Record identity within its kind.
    fn unique_id(&self) -> UniqueId;

    /// Authoritative event time (not write time; may be backdated).
    fn generation_time(&self) -> DateTime<Utc>;
}

// =============================================================================
// Shared state enums
// =============================================================================

/// Quality of a received raw transport frame.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Quality {
    Unknown,
    Good,
    Bad,
}

/// Severity of an event or operator message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Severity {
    Info,
    Warn,
    Alarm,
    Error,
}

/// Validity of a telemetry parameter sample.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Validity {
    Valid,
    Invalid,
    Disabled,
    Unknown,
}

/// Monitoring state of a parameter with respect to its limits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AlarmState {
    Nominal,
    Warning,
    Alarm,
    Unknown,
    NotChecked,
    Ignored,
}

/// Acknowledgement lifecycle of an operator message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AcknowledgementState {
    Pending,
    Acknowledged,
}

/// Lifecycle stage of an activity occurrence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ActivityState {
    Creation,
    Release,
    Transmission,
    Execution,
    Verification,
    Completion,
}

/// Outcome reported for one activity lifecycle transition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReportState {
    Pending,
    Ok,
    Fail,
    Timeout,
}

/// Scheduling lifecycle of a scheduled activity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SchedulingState {
    Scheduled,
    Waiting,
    Running,
    Finished,
    Aborted,
    Removed,
}

/// Resolution policy when a scheduled activity conflicts over a resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ConflictStrategy {
    Wait,
    DoNotStart,
    Abort,
}

/// Decode a persisted enum text column.
pub(crate) fn parse_enum<T: std::str::FromStr>(raw: &str) -> Result<T, ArchiveError> {
    raw.parse()
        .map_err(|_| ArchiveError::InvalidData(format!("unknown enum value '{raw}'")))
}
