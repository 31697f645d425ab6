//! Argus - Monitoring and Control Data Archive
//!
//! Persistence tier for a spacecraft monitoring-and-control platform: every
//! kind of time-stamped operational record (telemetry samples, raw transport
//! frames, events, alarm transitions, operator messages and their
//! acknowledgements, activity executions, scheduled commands) survives
//! process restarts and is queryable by time and domain predicates.
//!
//! # Architecture
//!
//! - **Write-behind buffering**: producers append to a bounded per-kind
//!   queue; a time trigger (default 1 s) and a high-water size trigger flush
//!   batches into single committed transactions. A failed batch is rolled
//!   back and dropped, never retried.
//! - **Per-kind engines**: one [`DataArchive`] per record kind, each with its
//!   own pair of connections and its own exclusion domain. Append-only kinds
//!   insert; evolving kinds upsert on `unique_id`; activity occurrences
//!   persist one occurrence row plus progress report rows.
//! - **Retrieval**: by id, time-anchored with direction and count, inclusive
//!   time range, record-anchored pagination with tie handling, and
//!   latest-value-as-of snapshots for current-state kinds. Everything is
//!   ordered on `(generation_time, unique_id)`.
//! - **Lifecycle**: purge by reference time, remove by id or filter for the
//!   scheduling kind, dispose, and a 2 s instrumentation sampler per kind.
//!
//! # Example
//!
//! ```rust,ignore
//! use argus::{Archive, RetrievalDirection};
//!
//! let archive = Archive::open("data/mission.db")?;
//! archive.events.store(event)?;
//! let recent = archive.events.retrieve_from(start, 100, RetrievalDirection::ToFuture, None)?;
//! archive.dispose();
//! ```

mod archive;
mod config;
mod engine;
mod error;
mod filter;
pub mod kinds;
mod provider;
pub mod schema;
mod types;

pub use archive::Archive;
pub use config::ArchiveConfig;
pub use engine::{DataArchive, RecordKind, DEFAULT_FLUSH_INTERVAL, QUEUE_CAPACITY, QUEUE_HIGH_WATER};
pub use error::ArchiveError;
pub use filter::{ItemFilter, QueryBuilder};
pub use provider::ConnectionProvider;
pub use types::{
    AcknowledgementState, ActivityState, AlarmState, ArchiveItem, ConflictStrategy,
    DebugInformation, Quality, ReportState, RetrievalDirection, SchedulingState, Severity,
    UniqueId, Validity,
};

pub use kinds::ack_message::{AcknowledgedMessage, AcknowledgedMessageFilter, AcknowledgedMessageKind};
pub use kinds::activity::{
    ActivityOccurrenceData, ActivityOccurrenceDataFilter, ActivityOccurrenceKind,
    ActivityOccurrenceReport,
};
pub use kinds::alarm::{AlarmKind, AlarmParameterData, AlarmParameterDataFilter};
pub use kinds::event::{EventData, EventDataFilter, EventKind};
pub use kinds::message::{OperationalMessage, OperationalMessageFilter, OperationalMessageKind};
pub use kinds::parameter::{ParameterData, ParameterDataFilter, ParameterKind};
pub use kinds::raw_data::{RawData, RawDataFilter, RawDataKind};
pub use kinds::schedule::{ScheduledActivityData, ScheduledActivityDataFilter, ScheduledActivityKind};
