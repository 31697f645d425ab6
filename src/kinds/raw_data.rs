//! Raw transport frames: append-only, immutable once written.

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::types::{from_micros, parse_enum, to_micros, ArchiveItem, Quality, UniqueId};

/// One received or transmitted transport frame (TM/TC packet, frame, CLTU).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    /// Frame designation, e.g. the packet name.
    pub name: String,
    pub reception_time: DateTime<Utc>,
    /// Frame class, e.g. `"TM PACKET"` or `"TC FRAME"`.
    pub data_type: String,
    /// Transport route the frame travelled on.
    pub route: String,
    /// Producing endpoint.
    pub source: String,
    pub quality: Quality,
    /// The frame body.
    pub contents: Option<Vec<u8>>,
    /// Kind-agnostic serialized extension payload.
    pub extension: Option<Vec<u8>>,
}

impl ArchiveItem for RawData {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Predicate bag for raw data retrievals; fields are ANDed, empty lists match all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDataFilter {
    pub name_contains: Option<String>,
    pub route_list: Vec<String>,
    pub type_list: Vec<String>,
    pub source_list: Vec<String>,
    pub quality_list: Vec<Quality>,
}

impl ItemFilter for RawDataFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        if let Some(needle) = &self.name_contains {
            query.and_contains("name", needle);
        }
        query.and_in("route", &self.route_list);
        query.and_in("type", &self.type_list);
        query.and_in("source", &self.source_list);
        query.and_in_states("quality", &self.quality_list);
    }
}

/// Persistence strategy for raw transport frames.
pub enum RawDataKind {}

impl RecordKind for RawDataKind {
    type Item = RawData;
    type Filter = RawDataFilter;

    const DISPLAY_NAME: &'static str = "raw data";
    const TABLE: &'static str = "raw_data";

    fn select_clause() -> String {
        "SELECT unique_id, generation_time, name, reception_time, type, route, source, \
         quality, contents, extension FROM raw_data"
            .to_string()
    }

    fn decode(row: &rusqlite::Row<'_>) -> Result<RawData, ArchiveError> {
        Ok(RawData {
            unique_id: row.get(0)?,
            generation_time: from_micros(row.get(1)?),
            name: row.get(2)?,
            reception_time: from_micros(row.get(3)?),
            data_type: row.get(4)?,
            route: row.get(5)?,
            source: row.get(6)?,
            quality: parse_enum(&row.get::<_, String>(7)?)?,
            contents: row.get(8)?,
            extension: row.get(9)?,
        })
    }

    fn persist(tx: &Transaction<'_>, items: &[RawData]) -> Result<(), ArchiveError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO raw_data (unique_id, generation_time, name, reception_time, type, \
             route, source, quality, contents, extension) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for item in items {
            stmt.execute(params![
                item.unique_id,
                to_micros(item.generation_time),
                item.name,
                to_micros(item.reception_time),
                item.data_type,
                item.route,
                item.source,
                item.quality.as_ref(),
                item.contents,
                item.extension,
            ])?;
        }
        Ok(())
    }
}
