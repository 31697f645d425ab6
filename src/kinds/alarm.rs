//! Parameter alarm transitions: append-only records of monitoring state
//! changes, with the latest-state-as-of snapshot keyed on the parameter path.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::kinds::parameter::dedupe_latest;
use crate::kinds::{column_to_json, json_to_column};
use crate::types::{from_micros, parse_enum, to_micros, AlarmState, ArchiveItem, UniqueId};

/// One alarm state transition of a monitored parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmParameterData {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    pub external_id: i64,
    pub name: String,
    /// Path of the monitored parameter; the snapshot identity key.
    pub path: String,
    pub current_alarm_state: AlarmState,
    /// Value that produced the current state.
    pub current_value: Option<Value>,
    pub reception_time: DateTime<Utc>,
    /// Last value seen in the nominal range, when any.
    pub last_nominal_value: Option<Value>,
    pub last_nominal_value_time: Option<DateTime<Utc>>,
    pub extension: Option<Vec<u8>>,
}

impl ArchiveItem for AlarmParameterData {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Predicate bag for alarm retrievals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmParameterDataFilter {
    pub parent_path: Option<String>,
    pub path_list: Vec<String>,
    pub alarm_state_list: Vec<AlarmState>,
}

impl ItemFilter for AlarmParameterDataFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        if let Some(prefix) = &self.parent_path {
            query.and_prefix("path", prefix);
        }
        query.and_in("path", &self.path_list);
        query.and_in_states("current_alarm_state", &self.alarm_state_list);
    }
}

/// Persistence strategy for alarm transitions.
pub enum AlarmKind {}

impl RecordKind for AlarmKind {
    type Item = AlarmParameterData;
    type Filter = AlarmParameterDataFilter;

    const DISPLAY_NAME: &'static str = "alarm";
    const TABLE: &'static str = "alarms";

    fn select_clause() -> String {
        // Column order matches the table definition (see the parameter kind).
        "SELECT unique_id, generation_time, external_id, name, path, current_alarm_state, \
         current_value, reception_time, last_nominal_value, last_nominal_value_time, \
         extension FROM alarms"
            .to_string()
    }

    fn decode(row: &rusqlite::Row<'_>) -> Result<AlarmParameterData, ArchiveError> {
        Ok(AlarmParameterData {
            unique_id: row.get(0)?,
            generation_time: from_micros(row.get(1)?),
            external_id: row.get(2)?,
            name: row.get(3)?,
            path: row.get(4)?,
            current_alarm_state: parse_enum(&row.get::<_, String>(5)?)?,
            current_value: column_to_json(row.get(6)?)?,
            reception_time: from_micros(row.get(7)?),
            last_nominal_value: column_to_json(row.get(8)?)?,
            last_nominal_value_time: row.get::<_, Option<i64>>(9)?.map(from_micros),
            extension: row.get(10)?,
        })
    }

    fn persist(tx: &Transaction<'_>, items: &[AlarmParameterData]) -> Result<(), ArchiveError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO alarms (unique_id, generation_time, external_id, name, path, \
             current_alarm_state, current_value, reception_time, last_nominal_value, \
             last_nominal_value_time, extension) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for item in items {
            stmt.execute(params![
                item.unique_id,
                to_micros(item.generation_time),
                item.external_id,
                item.name,
                item.path,
                item.current_alarm_state.as_ref(),
                json_to_column(item.current_value.as_ref())?,
                to_micros(item.reception_time),
                json_to_column(item.last_nominal_value.as_ref())?,
                item.last_nominal_value_time.map(to_micros),
                item.extension,
            ])?;
        }
        Ok(())
    }

    /// Latest alarm state per parameter path at the reference time.
    fn fetch_latest_state(
        conn: &Connection,
        reference_micros: i64,
        filter: Option<&AlarmParameterDataFilter>,
        lookback_micros: Option<i64>,
    ) -> Result<Vec<AlarmParameterData>, ArchiveError> {
        let mut query = QueryBuilder::new(
            "SELECT t.* FROM alarms AS t JOIN (\
             SELECT path, MAX(generation_time) AS latest_time FROM alarms \
             WHERE generation_time <= ?",
        );
        query.push_param(reference_micros);
        if let Some(lookback) = lookback_micros {
            query.push_sql(" AND generation_time >= ?");
            query.push_param(lookback);
        }
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
        if let Some(f) = filter {
            query.push_sql(" WHERE 1 = 1");
            query.and_in_states("t.current_alarm_state", &f.alarm_state_list);
        }
        let fetched = Self::fetch_query(conn, &query)?;
        Ok(dedupe_latest(fetched, |a| a.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ConnectionProvider;
    use crate::schema::init_schema;
    use serde_json::json;

    fn transition(id: i64, micros: i64, path: &str, state: AlarmState) -> AlarmParameterData {
        AlarmParameterData {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            external_id: 3,
            name: "battery_voltage".to_string(),
            path: path.to_string(),
            current_alarm_state: state,
            current_value: Some(json!(31.2)),
            reception_time: from_micros(micros + 1),
            last_nominal_value: Some(json!(28.0)),
            last_nominal_value_time: Some(from_micros(micros - 50)),
            extension: None,
        }
    }

    fn setup() -> (tempfile::TempDir, rusqlite::Connection) {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::new(dir.path().join("archive.db")).unwrap();
        let conn = provider.create_connection(true).unwrap();
        init_schema(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_roundtrip() {
        let (_dir, mut conn) = setup();
        let stored = transition(1, 100, "sat1.power.v", AlarmState::Alarm);
        let tx = conn.transaction().unwrap();
        AlarmKind::persist(&tx, std::slice::from_ref(&stored)).unwrap();
        tx.commit().unwrap();

        let fetched = AlarmKind::fetch_by_id(&conn, UniqueId(1)).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_snapshot_filters_on_latest_state() {
        let (_dir, mut conn) = setup();
        let items = vec![
            transition(1, 100, "sat1.power.v", AlarmState::Warning),
            transition(2, 200, "sat1.power.v", AlarmState::Alarm),
            transition(3, 150, "sat1.aocs.rate", AlarmState::Nominal),
        ];
        let tx = conn.transaction().unwrap();
        AlarmKind::persist(&tx, &items).unwrap();
        tx.commit().unwrap();

        let filter = AlarmParameterDataFilter {
            alarm_state_list: vec![AlarmState::Alarm],
            ..Default::default()
        };
        let snapshot = AlarmKind::fetch_latest_state(&conn, 1_000, Some(&filter), None).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].unique_id, UniqueId(2));

        // The warning at t=100 is superseded at t=200; asking at t=120 sees it.
        let earlier = AlarmKind::fetch_latest_state(&conn, 120, None, None).unwrap();
        let v = earlier.iter().find(|a| a.path == "sat1.power.v").unwrap();
        assert_eq!(v.current_alarm_state, AlarmState::Warning);
    }
}
