//! Operator messages: append-only log of human-facing notifications.

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::types::{from_micros, parse_enum, to_micros, ArchiveItem, Severity, UniqueId};

/// One message presented to the operator consoles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalMessage {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    /// Stable message code, e.g. `"TC-ACK-001"`.
    pub msg_id: String,
    pub text: String,
    pub source: Option<String>,
    pub severity: Severity,
    /// Entity in the system model the message refers to, when any.
    pub linked_entity_id: Option<i64>,
    pub extension: Option<Vec<u8>>,
}

impl ArchiveItem for OperationalMessage {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Predicate bag for message retrievals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationalMessageFilter {
    pub text_contains: Option<String>,
    pub id_list: Vec<String>,
    pub source_list: Vec<String>,
    pub severity_list: Vec<Severity>,
}

impl ItemFilter for OperationalMessageFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        if let Some(needle) = &self.text_contains {
            query.and_contains("text", needle);
        }
        query.and_in("msg_id", &self.id_list);
        query.and_in("source", &self.source_list);
        query.and_in_states("severity", &self.severity_list);
    }
}

/// Persistence strategy for operator messages.
pub enum OperationalMessageKind {}

pub(crate) const MESSAGE_COLUMNS: &str =
    "unique_id, generation_time, msg_id, text, source, severity, linked_entity_id, extension";

/// Decode one message from a row, starting at the given column offset.
/// Shared with the acknowledgement kind, whose select joins this table.
pub(crate) fn decode_message_at(
    row: &rusqlite::Row<'_>,
    offset: usize,
) -> Result<OperationalMessage, ArchiveError> {
    Ok(OperationalMessage {
        unique_id: row.get(offset)?,
        generation_time: from_micros(row.get(offset + 1)?),
        msg_id: row.get(offset + 2)?,
        text: row.get(offset + 3)?,
        source: row.get(offset + 4)?,
        severity: parse_enum(&row.get::<_, String>(offset + 5)?)?,
        linked_entity_id: row.get(offset + 6)?,
        extension: row.get(offset + 7)?,
    })
}

impl RecordKind for OperationalMessageKind {
    type Item = OperationalMessage;
    type Filter = OperationalMessageFilter;

    const DISPLAY_NAME: &'static str = "operational message";
    const TABLE: &'static str = "messages";

    fn select_clause() -> String {
        format!("SELECT {MESSAGE_COLUMNS} FROM messages")
    }

    fn decode(row: &rusqlite::Row<'_>) -> Result<OperationalMessage, ArchiveError> {
        decode_message_at(row, 0)
    }

    fn persist(tx: &Transaction<'_>, items: &[OperationalMessage]) -> Result<(), ArchiveError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO messages (unique_id, generation_time, msg_id, text, source, \
             severity, linked_entity_id, extension) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for item in items {
            stmt.execute(params![
                item.unique_id,
                to_micros(item.generation_time),
                item.msg_id,
                item.text,
                item.source,
                item.severity.as_ref(),
                item.linked_entity_id,
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

    pub(crate) fn message(id: i64, micros: i64, text: &str) -> OperationalMessage {
        OperationalMessage {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            msg_id: format!("MSG-{id:03}"),
            text: text.to_string(),
            source: Some("scheduler".to_string()),
            severity: Severity::Info,
            linked_entity_id: None,
            extension: None,
        }
    }

    #[test]
    fn test_text_containment_filter() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::new(dir.path().join("archive.db")).unwrap();
        let mut conn = provider.create_connection(true).unwrap();
        init_schema(&conn).unwrap();

        let items = vec![
            message(1, 100, "activity released"),
            message(2, 101, "limit violation on battery"),
            message(3, 102, "activity completed"),
        ];
        let tx = conn.transaction().unwrap();
        OperationalMessageKind::persist(&tx, &items).unwrap();
        tx.commit().unwrap();

        let filter = OperationalMessageFilter {
            text_contains: Some("activity".to_string()),
            ..Default::default()
        };
        let fetched = OperationalMessageKind::fetch_range(
            &conn,
            0,
            10,
            RetrievalDirection::ToFuture,
            Some(&filter),
        )
        .unwrap();
        let ids: Vec<i64> = fetched.iter().map(|m| m.unique_id.as_i64()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_descending_retrieval_order() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::new(dir.path().join("archive.db")).unwrap();
        let mut conn = provider.create_connection(true).unwrap();
        init_schema(&conn).unwrap();

        let items = vec![
            message(1, 100, "m1"),
            message(2, 100, "m2"),
            message(3, 200, "m3"),
        ];
        let tx = conn.transaction().unwrap();
        OperationalMessageKind::persist(&tx, &items).unwrap();
        tx.commit().unwrap();

        let fetched = OperationalMessageKind::fetch_range(
            &conn,
            1_000,
            10,
            RetrievalDirection::ToPast,
            None,
        )
        .unwrap();
        let ids: Vec<i64> = fetched.iter().map(|m| m.unique_id.as_i64()).collect();
        // Descending time, ties broken by descending id.
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
