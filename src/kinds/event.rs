//! Onboard and ground events: append-only occurrences in the system entity tree.

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::types::{from_micros, parse_enum, to_micros, ArchiveItem, Severity, UniqueId};

/// One event occurrence raised by the platform or the ground segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    /// Identifier of the event definition in the system model.
    pub external_id: i64,
    pub name: String,
    /// Location in the system entity tree, dot-separated.
    pub path: String,
    /// Free-text discriminator between occurrences of the same definition.
    pub qualifier: Option<String>,
    pub reception_time: DateTime<Utc>,
    pub event_type: String,
    pub route: Option<String>,
    pub source: Option<String>,
    pub severity: Severity,
    pub extension: Option<Vec<u8>>,
}

impl ArchiveItem for EventData {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Predicate bag for event retrievals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDataFilter {
    /// Subtree containment on the entity path.
    pub parent_path: Option<String>,
    pub path_list: Vec<String>,
    pub severity_list: Vec<Severity>,
    pub type_list: Vec<String>,
    pub route_list: Vec<String>,
    pub source_list: Vec<String>,
}

impl ItemFilter for EventDataFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        if let Some(prefix) = &self.parent_path {
            query.and_prefix("path", prefix);
        }
        query.and_in("path", &self.path_list);
        query.and_in_states("severity", &self.severity_list);
        query.and_in("type", &self.type_list);
        query.and_in("route", &self.route_list);
        query.and_in("source", &self.source_list);
    }
}

/// Persistence strategy for events.
pub enum EventKind {}

impl RecordKind for EventKind {
    type Item = EventData;
    type Filter = EventDataFilter;

    const DISPLAY_NAME: &'static str = "event";
    const TABLE: &'static str = "events";

    fn select_clause() -> String {
        "SELECT unique_id, generation_time, external_id, name, path, qualifier, \
         reception_time, type, route, source, severity, extension FROM events"
            .to_string()
    }

    fn decode(row: &rusqlite::Row<'_>) -> Result<EventData, ArchiveError> {
        Ok(EventData {
            unique_id: row.get(0)?,
            generation_time: from_micros(row.get(1)?),
            external_id: row.get(2)?,
            name: row.get(3)?,
            path: row.get(4)?,
            qualifier: row.get(5)?,
            reception_time: from_micros(row.get(6)?),
            event_type: row.get(7)?,
            route: row.get(8)?,
            source: row.get(9)?,
            severity: parse_enum(&row.get::<_, String>(10)?)?,
            extension: row.get(11)?,
        })
    }

    fn persist(tx: &Transaction<'_>, items: &[EventData]) -> Result<(), ArchiveError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO events (unique_id, generation_time, external_id, name, path, \
             qualifier, reception_time, type, route, source, severity, extension) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for item in items {
            stmt.execute(params![
                item.unique_id,
                to_micros(item.generation_time),
                item.external_id,
                item.name,
                item.path,
                item.qualifier,
                to_micros(item.reception_time),
                item.event_type,
                item.route,
                item.source,
                item.severity.as_ref(),
                item.extension,
            ])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ConnectionProvider;
    use crate::schema::init_schema;
    use crate::types::RetrievalDirection;

    fn event(id: i64, micros: i64, path: &str, severity: Severity) -> EventData {
        EventData {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            external_id: 100 + id,
            name: format!("event-{id}"),
            path: path.to_string(),
            qualifier: None,
            reception_time: from_micros(micros + 5),
            event_type: "onboard".to_string(),
            route: Some("route-1".to_string()),
            source: Some("obc".to_string()),
            severity,
            extension: None,
        }
    }

    #[test]
    fn test_subtree_and_severity_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::new(dir.path().join("archive.db")).unwrap();
        let mut conn = provider.create_connection(true).unwrap();
        init_schema(&conn).unwrap();

        let items = vec![
            event(1, 100, "sat1.aocs.ev1", Severity::Info),
            event(2, 101, "sat1.aocs.ev2", Severity::Alarm),
            event(3, 102, "sat1.power.ev3", Severity::Alarm),
        ];
        let tx = conn.transaction().unwrap();
        EventKind::persist(&tx, &items).unwrap();
        tx.commit().unwrap();

        let filter = EventDataFilter {
            parent_path: Some("sat1.aocs".to_string()),
            severity_list: vec![Severity::Alarm],
            ..Default::default()
        };
        let fetched =
            EventKind::fetch_range(&conn, 0, 10, RetrievalDirection::ToFuture, Some(&filter))
                .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].unique_id, UniqueId(2));
    }

    #[test]
    fn test_roundtrip_preserves_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::new(dir.path().join("archive.db")).unwrap();
        let mut conn = provider.create_connection(true).unwrap();
        init_schema(&conn).unwrap();

        let mut stored = event(5, 500, "sat1.obc.boot", Severity::Warn);
        stored.qualifier = Some("reboot #4".to_string());
        stored.route = None;
        stored.extension = Some(vec![9, 9, 9]);

        let tx = conn.transaction().unwrap();
        EventKind::persist(&tx, std::slice::from_ref(&stored)).unwrap();
        tx.commit().unwrap();

        let fetched = EventKind::fetch_by_id(&conn, UniqueId(5)).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }
}
