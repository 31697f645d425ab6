//! Per-kind persistence strategies.
//!
//! One submodule per record kind: the typed record, its filter object and the
//! [`RecordKind`](crate::engine::RecordKind) implementation binding it to its
//! table. Append-only kinds use the default batched insert; evolving kinds
//! upsert on `unique_id`; the activity kind persists an occurrence row plus
//! report rows.

pub mod activity;
pub mod ack_message;
pub mod alarm;
pub mod event;
pub mod message;
pub mod parameter;
pub mod raw_data;
pub mod schedule;

use serde_json::Value;

use crate::error::ArchiveError;

/// Encode an optional JSON value for a TEXT column.
pub(crate) fn json_to_column(value: Option<&Value>) -> Result<Option<String>, ArchiveError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(ArchiveError::from)
}

/// Decode an optional JSON TEXT column.
pub(crate) fn column_to_json(raw: Option<String>) -> Result<Option<Value>, ArchiveError> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(ArchiveError::from)
}
