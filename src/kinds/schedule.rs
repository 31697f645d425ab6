//! Scheduled activities: evolving entities tracking schedule entries, with
//! removal by id or by filter to invalidate stale entries.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::kinds::{column_to_json, json_to_column};
use crate::types::{
    from_micros, parse_enum, to_micros, ArchiveItem, ConflictStrategy, SchedulingState, UniqueId,
};

/// One entry of the activity schedule.
///
/// The same `unique_id` is stored again as the entry moves through its
/// scheduling lifecycle; the archive keeps one row holding the latest state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledActivityData {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    /// Serialized activity invocation request.
    pub request: Value,
    /// Path of the activity the request targets.
    pub path: String,
    /// Occurrence spawned by this entry once released, when any.
    pub activity_occurrence: Option<UniqueId>,
    /// Resources the entry needs; persisted space-delimited for tag matching.
    pub resources: BTreeSet<String>,
    pub source: String,
    /// Identifier assigned by the requesting subsystem.
    pub external_id: i64,
    /// Serialized scheduling trigger (absolute time, event, relative).
    pub trigger: Option<Value>,
    pub latest_invocation_time: Option<DateTime<Utc>>,
    pub conflict_strategy: ConflictStrategy,
    pub state: SchedulingState,
    pub extension: Option<Vec<u8>>,
}

impl ArchiveItem for ScheduledActivityData {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Persisted form of the resource set: `" a b "`, so that a single tag can be
/// matched with `LIKE '% tag %'`.
fn format_resources(resources: &BTreeSet<String>) -> String {
    if resources.is_empty() {
        return String::new();
    }
    let mut formatted = String::from(" ");
    for resource in resources {
        formatted.push_str(resource);
        formatted.push(' ');
    }
    formatted
}

fn parse_resources(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Predicate bag for scheduled activity retrievals and removals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledActivityDataFilter {
    pub parent_path: Option<String>,
    pub path_list: Vec<String>,
    pub source_list: Vec<String>,
    pub external_id_list: Vec<i64>,
    pub state_list: Vec<SchedulingState>,
    /// Entries holding any of these resources match.
    pub resource_list: Vec<String>,
}

impl ItemFilter for ScheduledActivityDataFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        if let Some(prefix) = &self.parent_path {
            query.and_prefix("path", prefix);
        }
        query.and_in("path", &self.path_list);
        query.and_in("source", &self.source_list);
        query.and_in("external_id", &self.external_id_list);
        query.and_in_states("state", &self.state_list);
        query.and_any_tag("resources", &self.resource_list);
    }
}

/// Persistence strategy for scheduled activities.
pub enum ScheduledActivityKind {}

impl RecordKind for ScheduledActivityKind {
    type Item = ScheduledActivityData;
    type Filter = ScheduledActivityDataFilter;

    const DISPLAY_NAME: &'static str = "scheduled activity";
    const TABLE: &'static str = "scheduled_activities";

    fn select_clause() -> String {
        "SELECT unique_id, generation_time, request, path, activity_occurrence, resources, \
         source, external_id, trigger_info, latest_invocation_time, conflict_strategy, state, \
         extension FROM scheduled_activities"
            .to_string()
    }

    fn decode(row: &rusqlite::Row<'_>) -> Result<ScheduledActivityData, ArchiveError> {
        Ok(ScheduledActivityData {
            unique_id: row.get(0)?,
            generation_time: from_micros(row.get(1)?),
            request: serde_json::from_str(&row.get::<_, String>(2)?)?,
            path: row.get(3)?,
            activity_occurrence: row.get(4)?,
            resources: parse_resources(&row.get::<_, String>(5)?),
            source: row.get(6)?,
            external_id: row.get(7)?,
            trigger: column_to_json(row.get(8)?)?,
            latest_invocation_time: row.get::<_, Option<i64>>(9)?.map(from_micros),
            conflict_strategy: parse_enum(&row.get::<_, String>(10)?)?,
            state: parse_enum(&row.get::<_, String>(11)?)?,
            extension: row.get(12)?,
        })
    }

    /// Upsert keyed on `unique_id`: a newly scheduled entry inserts, every
    /// later lifecycle change updates the existing row.
    fn persist(tx: &Transaction<'_>, items: &[ScheduledActivityData]) -> Result<(), ArchiveError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO scheduled_activities (unique_id, generation_time, request, path, \
             activity_occurrence, resources, source, external_id, trigger_info, \
             latest_invocation_time, conflict_strategy, state, extension) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(unique_id) DO UPDATE SET \
             generation_time = excluded.generation_time, \
             request = excluded.request, \
             path = excluded.path, \
             activity_occurrence = excluded.activity_occurrence, \
             resources = excluded.resources, \
             source = excluded.source, \
             external_id = excluded.external_id, \
             trigger_info = excluded.trigger_info, \
             latest_invocation_time = excluded.latest_invocation_time, \
             conflict_strategy = excluded.conflict_strategy, \
             state = excluded.state, \
             extension = excluded.extension",
        )?;
        for item in items {
            stmt.execute(params![
                item.unique_id,
                to_micros(item.generation_time),
                serde_json::to_string(&item.request)?,
                item.path,
                item.activity_occurrence,
                format_resources(&item.resources),
                item.source,
                item.external_id,
                json_to_column(item.trigger.as_ref())?,
                item.latest_invocation_time.map(to_micros),
                item.conflict_strategy.as_ref(),
                item.state.as_ref(),
                item.extension,
            ])?;
        }
        Ok(())
    }

    fn remove_by_id_statement() -> Option<String> {
        Some("DELETE FROM scheduled_activities WHERE unique_id = ?".to_string())
    }

    fn remove_by_filter_query(filter: &ScheduledActivityDataFilter) -> Option<QueryBuilder> {
        let mut query = QueryBuilder::new("DELETE FROM scheduled_activities WHERE 1 = 1");
        filter.apply(&mut query);
        Some(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ConnectionProvider;
    use crate::schema::init_schema;
    use serde_json::json;

    fn entry(id: i64, micros: i64, resources: &[&str]) -> ScheduledActivityData {
        ScheduledActivityData {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            request: json!({"path": "sat1.power.heater", "arguments": {"on": true}}),
            path: "sat1.power.heater".to_string(),
            activity_occurrence: None,
            resources: resources.iter().map(|s| s.to_string()).collect(),
            source: "mission-plan".to_string(),
            external_id: 900 + id,
            trigger: Some(json!({"absolute_time": micros})),
            latest_invocation_time: None,
            conflict_strategy: ConflictStrategy::Wait,
            state: SchedulingState::Scheduled,
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
    fn test_resource_format_roundtrip() {
        let resources: BTreeSet<String> =
            ["antenna".to_string(), "thruster".to_string()].into();
        let formatted = format_resources(&resources);
        assert_eq!(formatted, " antenna thruster ");
        assert_eq!(parse_resources(&formatted), resources);
        assert!(format_resources(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_lifecycle_updates_converge_to_one_row() {
        let (_dir, mut conn) = setup();
        let scheduled = entry(1, 100, &["antenna"]);
        let mut running = scheduled.clone();
        running.state = SchedulingState::Running;
        running.latest_invocation_time = Some(from_micros(400));
        running.activity_occurrence = Some(UniqueId(77));

        let tx = conn.transaction().unwrap();
        ScheduledActivityKind::persist(&tx, std::slice::from_ref(&scheduled)).unwrap();
        tx.commit().unwrap();
        let tx = conn.transaction().unwrap();
        ScheduledActivityKind::persist(&tx, std::slice::from_ref(&running)).unwrap();
        tx.commit().unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM scheduled_activities", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        let fetched = ScheduledActivityKind::fetch_by_id(&conn, UniqueId(1))
            .unwrap()
            .unwrap();
        assert_eq!(fetched, running);
    }

    #[test]
    fn test_resource_tag_filter_matches_whole_tags_only() {
        let (_dir, mut conn) = setup();
        let items = vec![
            entry(1, 100, &["antenna"]),
            entry(2, 101, &["antenna-b"]),
            entry(3, 102, &["thruster", "antenna"]),
        ];
        let tx = conn.transaction().unwrap();
        ScheduledActivityKind::persist(&tx, &items).unwrap();
        tx.commit().unwrap();

        let filter = ScheduledActivityDataFilter {
            resource_list: vec!["antenna".to_string()],
            ..Default::default()
        };
        let fetched = ScheduledActivityKind::fetch_range(
            &conn,
            0,
            10,
            crate::types::RetrievalDirection::ToFuture,
            Some(&filter),
        )
        .unwrap();
        let ids: Vec<i64> = fetched.iter().map(|s| s.unique_id.as_i64()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_remove_by_filter_builds_bounded_delete() {
        let filter = ScheduledActivityDataFilter {
            state_list: vec![SchedulingState::Aborted, SchedulingState::Removed],
            ..Default::default()
        };
        let query = ScheduledActivityKind::remove_by_filter_query(&filter).unwrap();
        assert_eq!(
            query.sql(),
            "DELETE FROM scheduled_activities WHERE 1 = 1 AND state IN (?,?)"
        );
        assert_eq!(query.param_refs().len(), 2);
    }
}
