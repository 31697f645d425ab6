//! Telemetry parameter samples: append-only, with the latest-value-as-of
//! snapshot retrieval keyed on the parameter path.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::kinds::{column_to_json, json_to_column};
use crate::types::{
    from_micros, parse_enum, to_micros, AlarmState, ArchiveItem, UniqueId, Validity,
};

/// One telemetry parameter sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterData {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    /// Identifier of the parameter definition in the system model.
    pub external_id: i64,
    pub name: String,
    /// Location in the system entity tree; the snapshot identity key.
    pub path: String,
    /// Calibrated engineering value.
    pub eng_value: Option<Value>,
    /// Uncalibrated source value.
    pub raw_value: Option<Value>,
    pub reception_time: DateTime<Utc>,
    pub route: Option<String>,
    pub validity: Validity,
    pub alarm_state: AlarmState,
    pub extension: Option<Vec<u8>>,
}

impl ArchiveItem for ParameterData {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Predicate bag for parameter retrievals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterDataFilter {
    pub parent_path: Option<String>,
    pub path_list: Vec<String>,
    pub route_list: Vec<String>,
    pub validity_list: Vec<Validity>,
    pub alarm_state_list: Vec<AlarmState>,
    pub external_id_list: Vec<i64>,
}

impl ItemFilter for ParameterDataFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        if let Some(prefix) = &self.parent_path {
            query.and_prefix("path", prefix);
        }
        query.and_in("path", &self.path_list);
        query.and_in("route", &self.route_list);
        query.and_in_states("validity", &self.validity_list);
        query.and_in_states("alarm_state", &self.alarm_state_list);
        query.and_in("external_id", &self.external_id_list);
    }
}

/// Persistence strategy for parameter samples.
pub enum ParameterKind {}

impl RecordKind for ParameterKind {
    type Item = ParameterData;
    type Filter = ParameterDataFilter;

    const DISPLAY_NAME: &'static str = "parameter";
    const TABLE: &'static str = "parameters";

    fn select_clause() -> String {
        // Column order matches the table definition so the snapshot query can
        // select `t.*` through the grouped join.
        "SELECT unique_id, generation_time, external_id, name, path, eng_value, raw_value, \
         reception_time, route, validity, alarm_state, extension FROM parameters"
            .to_string()
    }

    fn decode(row: &rusqlite::Row<'_>) -> Result<ParameterData, ArchiveError> {
        Ok(ParameterData {
            unique_id: row.get(0)?,
            generation_time: from_micros(row.get(1)?),
            external_id: row.get(2)?,
            name: row.get(3)?,
            path: row.get(4)?,
            eng_value: column_to_json(row.get(5)?)?,
            raw_value: column_to_json(row.get(6)?)?,
            reception_time: from_micros(row.get(7)?),
            route: row.get(8)?,
            validity: parse_enum(&row.get::<_, String>(9)?)?,
            alarm_state: parse_enum(&row.get::<_, String>(10)?)?,
            extension: row.get(11)?,
        })
    }

    fn persist(tx: &Transaction<'_>, items: &[ParameterData]) -> Result<(), ArchiveError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO parameters (unique_id, generation_time, external_id, name, path, \
             eng_value, raw_value, reception_time, route, validity, alarm_state, extension) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for item in items {
            stmt.execute(params![
                item.unique_id,
                to_micros(item.generation_time),
                item.external_id,
                item.name,
                item.path,
                json_to_column(item.eng_value.as_ref())?,
                json_to_column(item.raw_value.as_ref())?,
                to_micros(item.reception_time),
                item.route,
                item.validity.as_ref(),
                item.alarm_state.as_ref(),
                item.extension,
            ])?;
        }
        Ok(())
    }

    /// Latest sample per parameter path with generation time at or before the
    /// reference (and within the lookback bound when given).
    fn fetch_latest_state(
        conn: &Connection,
        reference_micros: i64,
        filter: Option<&ParameterDataFilter>,
        lookback_micros: Option<i64>,
    ) -> Result<Vec<ParameterData>, ArchiveError> {
        let mut query = QueryBuilder::new(
            "SELECT t.* FROM parameters AS t JOIN (\
             SELECT path, MAX(generation_time) AS latest_time FROM parameters \
             WHERE generation_time <= ?",
        );
        query.push_param(reference_micros);
        if let Some(lookback) = lookback_micros {
            query.push_sql(" AND generation_time >= ?");
            query.push_param(lookback);
        }
        // Identity-narrowing predicates go inside the grouped subquery.
        if let Some(f) = filter {
            if let Some(prefix) = &f.parent_path {
                query.and_prefix("path", prefix);
            }
            query.and_in("path", &f.path_list);
        }
        query.push_sql(
            " GROUP BY path) AS latest \
             ON t.path = latest.path AND t.generation_time = latest.latest_time",
        );
        // State predicates apply to the joined latest rows.
        if let Some(f) = filter {
            query.push_sql(" WHERE 1 = 1");
            query.and_in("t.route", &f.route_list);
            query.and_in_states("t.validity", &f.validity_list);
            query.and_in_states("t.alarm_state", &f.alarm_state_list);
            query.and_in("t.external_id", &f.external_id_list);
        }
        let fetched = Self::fetch_query(conn, &query)?;
        Ok(dedupe_latest(fetched, |p| p.path.clone()))
    }
}

/// One record per identity key: when two rows of one key share the maximal
/// generation time, the one with the larger unique id wins.
pub(crate) fn dedupe_latest<T: ArchiveItem>(items: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut by_key: BTreeMap<String, T> = BTreeMap::new();
    for item in items {
        let k = key(&item);
        match by_key.get(&k) {
            Some(existing) if existing.unique_id() >= item.unique_id() => {}
            _ => {
                by_key.insert(k, item);
            }
        }
    }
    by_key.into_values().collect()
}
