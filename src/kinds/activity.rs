//! Activity occurrences: hybrid topology — one durable occurrence row plus N
//! durable progress report rows, reassembled into a nested structure on
//! retrieval.
//!
//! Per flush cycle at most one new report row is written per occurrence: the
//! report attached at flush time. Intermediate reports accumulated between
//! flushes are compacted away; the flush interval is the compaction
//! granularity. This is policy, not defect.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::types::{
    from_micros, parse_enum, to_micros, ActivityState, ArchiveItem, ReportState,
    RetrievalDirection, UniqueId,
};

/// One progress report of an activity occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOccurrenceReport {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    pub name: String,
    pub execution_time: Option<DateTime<Utc>>,
    /// Lifecycle stage the report belongs to.
    pub state: ActivityState,
    /// Stage the occurrence moves to as a consequence of this report.
    pub transition: ActivityState,
    pub status: ReportState,
    pub result: Option<Value>,
    pub extension: Option<Vec<u8>>,
}

/// One activity (command) execution with its progress report history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOccurrenceData {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    pub external_id: i64,
    pub name: String,
    pub path: String,
    pub activity_type: String,
    pub route: String,
    pub source: String,
    pub arguments: BTreeMap<String, Value>,
    pub properties: BTreeMap<String, String>,
    /// Reports in `(generation_time, unique_id)` order.
    pub reports: Vec<ActivityOccurrenceReport>,
    pub extension: Option<Vec<u8>>,
}

impl ActivityOccurrenceData {
    /// Lifecycle stage of the occurrence: the stage of its last report,
    /// `Creation` when no report is attached yet.
    pub fn current_state(&self) -> ActivityState {
        self.reports
            .last()
            .map(|r| r.state)
            .unwrap_or(ActivityState::Creation)
    }
}

impl ArchiveItem for ActivityOccurrenceData {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Predicate bag for activity occurrence retrievals.
///
/// The state predicate applies to the reassembled occurrence's current state
/// in memory, not to the SQL query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityOccurrenceDataFilter {
    pub parent_path: Option<String>,
    pub route_list: Vec<String>,
    pub type_list: Vec<String>,
    pub source_list: Vec<String>,
    pub state_list: Vec<ActivityState>,
}

impl ItemFilter for ActivityOccurrenceDataFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        if let Some(prefix) = &self.parent_path {
            query.and_prefix("path", prefix);
        }
        query.and_in("route", &self.route_list);
        query.and_in("type", &self.type_list);
        query.and_in("source", &self.source_list);
        // state_list is checked after reassembly.
    }
}

impl ActivityOccurrenceDataFilter {
    fn matches_state(&self, occurrence: &ActivityOccurrenceData) -> bool {
        self.state_list.is_empty() || self.state_list.contains(&occurrence.current_state())
    }
}

/// Persistence strategy for activity occurrences.
pub enum ActivityOccurrenceKind {}

const JOINED_COLUMNS: &str = "ao.unique_id, ao.generation_time, ao.external_id, ao.name, \
     ao.path, ao.type, ao.route, ao.source, ao.arguments, ao.properties, ao.extension, \
     r.unique_id, r.generation_time, r.name, r.execution_time, r.state, r.transition, \
     r.status, r.result, r.extension";

impl ActivityOccurrenceKind {
    /// Merge adjacent joined rows sharing one occurrence id into a single
    /// occurrence carrying all its reports.
    fn assemble(rows: Vec<ActivityOccurrenceData>) -> Vec<ActivityOccurrenceData> {
        let mut result: Vec<ActivityOccurrenceData> = Vec::new();
        for row in rows {
            match result.last_mut() {
                Some(last) if last.unique_id == row.unique_id => {
                    last.reports.extend(row.reports);
                }
                _ => result.push(row),
            }
        }
        result
    }

    fn fetch_assembled(
        conn: &Connection,
        query: &QueryBuilder,
        filter: Option<&ActivityOccurrenceDataFilter>,
    ) -> Result<Vec<ActivityOccurrenceData>, ArchiveError> {
        let rows = Self::fetch_query(conn, query)?;
        let mut occurrences = Self::assemble(rows);
        if let Some(f) = filter {
            occurrences.retain(|occ| f.matches_state(occ));
        }
        Ok(occurrences)
    }

    /// Joined select over an inner occurrence-selecting subquery, ordered so
    /// that each occurrence's rows are adjacent and its reports in order.
    fn joined_query(inner: QueryBuilder, order: &str) -> QueryBuilder {
        let mut query = QueryBuilder::new(format!(
            "SELECT {JOINED_COLUMNS} FROM activity_reports AS r JOIN ({}) AS ao \
             ON ao.unique_id = r.activity_occurrence_id \
             ORDER BY ao.generation_time {order}, ao.unique_id {order}, \
             r.generation_time ASC, r.unique_id ASC",
            inner.sql()
        ));
        for p in inner.into_params() {
            query.push_boxed_param(p);
        }
        query
    }
}

impl RecordKind for ActivityOccurrenceKind {
    type Item = ActivityOccurrenceData;
    type Filter = ActivityOccurrenceDataFilter;

    const DISPLAY_NAME: &'static str = "activity occurrence";
    const TABLE: &'static str = "activity_occurrences";

    fn select_clause() -> String {
        format!(
            "SELECT {JOINED_COLUMNS} FROM activity_occurrences AS ao \
             JOIN activity_reports AS r ON ao.unique_id = r.activity_occurrence_id"
        )
    }

    fn qualifier() -> &'static str {
        "ao."
    }

    /// Decode one joined row: the occurrence carrying that row's single report.
    fn decode(row: &rusqlite::Row<'_>) -> Result<ActivityOccurrenceData, ArchiveError> {
        let arguments: BTreeMap<String, Value> = serde_json::from_str(&row.get::<_, String>(8)?)?;
        let properties: BTreeMap<String, String> =
            serde_json::from_str(&row.get::<_, String>(9)?)?;
        let report = ActivityOccurrenceReport {
            unique_id: row.get(11)?,
            generation_time: from_micros(row.get(12)?),
            name: row.get(13)?,
            execution_time: row.get::<_, Option<i64>>(14)?.map(from_micros),
            state: parse_enum(&row.get::<_, String>(15)?)?,
            transition: parse_enum(&row.get::<_, String>(16)?)?,
            status: parse_enum(&row.get::<_, String>(17)?)?,
            result: crate::kinds::column_to_json(row.get(18)?)?,
            extension: row.get(19)?,
        };
        Ok(ActivityOccurrenceData {
            unique_id: row.get(0)?,
            generation_time: from_micros(row.get(1)?),
            external_id: row.get(2)?,
            name: row.get(3)?,
            path: row.get(4)?,
            activity_type: row.get(5)?,
            route: row.get(6)?,
            source: row.get(7)?,
            arguments,
            properties,
            reports: vec![report],
            extension: row.get(10)?,
        })
    }

    /// Occurrence and report batches: the occurrence row is inserted only on
    /// first durable write (zero reports, or exactly the creation report);
    /// exactly one report row — the latest attached — is inserted per
    /// occurrence that has any.
    fn persist(tx: &Transaction<'_>, items: &[ActivityOccurrenceData]) -> Result<(), ArchiveError> {
        let mut occ_stmt = tx.prepare_cached(
            "INSERT INTO activity_occurrences (unique_id, generation_time, external_id, \
             name, path, type, route, source, arguments, properties, extension) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(unique_id) DO NOTHING",
        )?;
        let mut report_stmt = tx.prepare_cached(
            "INSERT INTO activity_reports (unique_id, generation_time, name, execution_time, \
             state, transition, status, result, activity_occurrence_id, extension) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(unique_id) DO NOTHING",
        )?;
        for occurrence in items {
            if occurrence.current_state() == ActivityState::Creation
                && occurrence.reports.len() <= 1
            {
                occ_stmt.execute(params![
                    occurrence.unique_id,
                    to_micros(occurrence.generation_time),
                    occurrence.external_id,
                    occurrence.name,
                    occurrence.path,
                    occurrence.activity_type,
                    occurrence.route,
                    occurrence.source,
                    serde_json::to_string(&occurrence.arguments)?,
                    serde_json::to_string(&occurrence.properties)?,
                    occurrence.extension,
                ])?;
            }
            if let Some(report) = occurrence.reports.last() {
                report_stmt.execute(params![
                    report.unique_id,
                    to_micros(report.generation_time),
                    report.name,
                    report.execution_time.map(to_micros),
                    report.state.as_ref(),
                    report.transition.as_ref(),
                    report.status.as_ref(),
                    crate::kinds::json_to_column(report.result.as_ref())?,
                    occurrence.unique_id,
                    report.extension,
                ])?;
            }
        }
        Ok(())
    }

    fn fetch_by_id(
        conn: &Connection,
        id: UniqueId,
    ) -> Result<Option<ActivityOccurrenceData>, ArchiveError> {
        let mut query = QueryBuilder::new(format!(
            "{} WHERE ao.unique_id = ? ORDER BY r.generation_time ASC, r.unique_id ASC",
            Self::select_clause()
        ));
        query.push_param(id);
        let mut occurrences = Self::fetch_assembled(conn, &query, None)?;
        Ok(if occurrences.is_empty() {
            None
        } else {
            Some(occurrences.swap_remove(0))
        })
    }

    fn fetch_range(
        conn: &Connection,
        start_micros: i64,
        count: usize,
        direction: RetrievalDirection,
        filter: Option<&ActivityOccurrenceDataFilter>,
    ) -> Result<Vec<ActivityOccurrenceData>, ArchiveError> {
        let ord = direction.order();
        let mut inner = QueryBuilder::new(format!(
            "SELECT * FROM activity_occurrences WHERE generation_time {} ?",
            direction.time_op()
        ));
        inner.push_param(start_micros);
        if let Some(f) = filter {
            f.apply(&mut inner);
        }
        inner.push_sql(&format!(
            " ORDER BY generation_time {ord}, unique_id {ord} LIMIT {count}"
        ));
        let query = Self::joined_query(inner, ord);
        Self::fetch_assembled(conn, &query, filter)
    }

    fn fetch_anchored(
        conn: &Connection,
        start_micros: i64,
        anchor: UniqueId,
        count: usize,
        direction: RetrievalDirection,
        filter: Option<&ActivityOccurrenceDataFilter>,
    ) -> Result<Vec<ActivityOccurrenceData>, ArchiveError> {
        let ord = direction.order();
        let mut inner = QueryBuilder::new(format!(
            "SELECT * FROM activity_occurrences \
             WHERE (generation_time {} ? OR (generation_time = ? AND unique_id {} ?))",
            direction.strict_op(),
            direction.time_op()
        ));
        inner.push_param(start_micros);
        inner.push_param(start_micros);
        inner.push_param(anchor);
        if let Some(f) = filter {
            f.apply(&mut inner);
        }
        inner.push_sql(&format!(
            " ORDER BY generation_time {ord}, unique_id {ord} LIMIT {count}"
        ));
        let query = Self::joined_query(inner, ord);
        Self::fetch_assembled(conn, &query, filter)
    }

    fn fetch_between(
        conn: &Connection,
        lo_micros: i64,
        hi_micros: i64,
        ascending: bool,
        filter: Option<&ActivityOccurrenceDataFilter>,
    ) -> Result<Vec<ActivityOccurrenceData>, ArchiveError> {
        let ord = if ascending { "ASC" } else { "DESC" };
        let mut inner = QueryBuilder::new(
            "SELECT * FROM activity_occurrences \
             WHERE generation_time >= ? AND generation_time <= ?",
        );
        inner.push_param(lo_micros);
        inner.push_param(hi_micros);
        if let Some(f) = filter {
            f.apply(&mut inner);
        }
        inner.push_sql(&format!(" ORDER BY generation_time {ord}, unique_id {ord}"));
        let query = Self::joined_query(inner, ord);
        Self::fetch_assembled(conn, &query, filter)
    }

    /// Purging occurrences drops their report rows in the same transaction.
    fn purge_statements(direction: RetrievalDirection) -> Vec<String> {
        let op = direction.strict_op();
        vec![
            format!(
                "DELETE FROM activity_reports WHERE activity_occurrence_id IN \
                 (SELECT unique_id FROM activity_occurrences WHERE generation_time {op} ?)"
            ),
            format!("DELETE FROM activity_occurrences WHERE generation_time {op} ?"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ConnectionProvider;
    use crate::schema::init_schema;
    use serde_json::json;

    fn report(id: i64, micros: i64, state: ActivityState) -> ActivityOccurrenceReport {
        ActivityOccurrenceReport {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            name: format!("report-{id}"),
            execution_time: None,
            state,
            transition: state,
            status: ReportState::Ok,
            result: None,
            extension: None,
        }
    }

    fn occurrence(id: i64, micros: i64, reports: Vec<ActivityOccurrenceReport>) -> ActivityOccurrenceData {
        let mut arguments = BTreeMap::new();
        arguments.insert("level".to_string(), json!(3));
        let mut properties = BTreeMap::new();
        properties.insert("origin".to_string(), "console".to_string());
        ActivityOccurrenceData {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            external_id: 11,
            name: "switch-heater".to_string(),
            path: "sat1.power.heater".to_string(),
            activity_type: "TC".to_string(),
            route: "route-1".to_string(),
            source: "console".to_string(),
            arguments,
            properties,
            reports,
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
    fn test_creation_then_progress_yields_one_occurrence_row_per_report_cycle() {
        let (_dir, mut conn) = setup();

        // Flush cycle 1: freshly created occurrence with its creation report.
        let created = occurrence(1, 100, vec![report(10, 100, ActivityState::Creation)]);
        let tx = conn.transaction().unwrap();
        ActivityOccurrenceKind::persist(&tx, std::slice::from_ref(&created)).unwrap();
        tx.commit().unwrap();

        // Flush cycle 2: same occurrence, two new reports accumulated — only
        // the latest one becomes durable.
        let mut progressed = created.clone();
        progressed
            .reports
            .push(report(11, 150, ActivityState::Release));
        progressed
            .reports
            .push(report(12, 180, ActivityState::Execution));
        let tx = conn.transaction().unwrap();
        ActivityOccurrenceKind::persist(&tx, std::slice::from_ref(&progressed)).unwrap();
        tx.commit().unwrap();

        let occ_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM activity_occurrences", [], |r| r.get(0))
            .unwrap();
        let report_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM activity_reports", [], |r| r.get(0))
            .unwrap();
        assert_eq!(occ_rows, 1);
        assert_eq!(report_rows, 2);

        let fetched = ActivityOccurrenceKind::fetch_by_id(&conn, UniqueId(1))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.reports.len(), 2);
        assert_eq!(fetched.reports[0].unique_id, UniqueId(10));
        assert_eq!(fetched.reports[1].unique_id, UniqueId(12));
        assert_eq!(fetched.current_state(), ActivityState::Execution);
        assert_eq!(fetched.arguments, created.arguments);
    }

    #[test]
    fn test_range_retrieval_reassembles_and_post_filters_state() {
        let (_dir, mut conn) = setup();

        let first = occurrence(1, 100, vec![report(10, 100, ActivityState::Creation)]);
        let second = occurrence(2, 200, vec![report(20, 200, ActivityState::Creation)]);
        let tx = conn.transaction().unwrap();
        ActivityOccurrenceKind::persist(&tx, &[first.clone(), second.clone()]).unwrap();
        tx.commit().unwrap();

        // Progress only the second occurrence.
        let mut progressed = second.clone();
        progressed
            .reports
            .push(report(21, 250, ActivityState::Completion));
        let tx = conn.transaction().unwrap();
        ActivityOccurrenceKind::persist(&tx, std::slice::from_ref(&progressed)).unwrap();
        tx.commit().unwrap();

        let all = ActivityOccurrenceKind::fetch_range(
            &conn,
            0,
            10,
            RetrievalDirection::ToFuture,
            None,
        )
        .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].unique_id, UniqueId(1));
        assert_eq!(all[1].reports.len(), 2);

        let filter = ActivityOccurrenceDataFilter {
            state_list: vec![ActivityState::Completion],
            ..Default::default()
        };
        let completed = ActivityOccurrenceKind::fetch_range(
            &conn,
            0,
            10,
            RetrievalDirection::ToFuture,
            Some(&filter),
        )
        .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].unique_id, UniqueId(2));
    }

    #[test]
    fn test_purge_drops_orphan_reports() {
        let (_dir, mut conn) = setup();
        let old = occurrence(1, 100, vec![report(10, 100, ActivityState::Creation)]);
        let recent = occurrence(2, 900, vec![report(20, 900, ActivityState::Creation)]);
        let tx = conn.transaction().unwrap();
        ActivityOccurrenceKind::persist(&tx, &[old, recent]).unwrap();
        tx.commit().unwrap();

        let statements = ActivityOccurrenceKind::purge_statements(RetrievalDirection::ToPast);
        let tx = conn.transaction().unwrap();
        for sql in &statements {
            tx.execute(sql, [500_i64]).unwrap();
        }
        tx.commit().unwrap();

        let occ_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM activity_occurrences", [], |r| r.get(0))
            .unwrap();
        let report_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM activity_reports", [], |r| r.get(0))
            .unwrap();
        assert_eq!(occ_rows, 1);
        assert_eq!(report_rows, 1);
    }
}
