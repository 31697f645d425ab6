//! Message acknowledgements: evolving entities converging to one durable row
//! per acknowledgement, joined with the operator message they acknowledge.

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};

use crate::engine::RecordKind;
use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::kinds::message::{decode_message_at, OperationalMessage};
use crate::types::{from_micros, parse_enum, to_micros, AcknowledgementState, ArchiveItem, UniqueId};

/// Acknowledgement state of one operator message.
///
/// The same `unique_id` is stored again when the state changes (pending →
/// acknowledged); the archive keeps a single row holding the latest state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgedMessage {
    pub unique_id: UniqueId,
    pub generation_time: DateTime<Utc>,
    /// The message being acknowledged. Must be durable in the message archive
    /// for retrievals to return this entity.
    pub message: OperationalMessage,
    pub state: AcknowledgementState,
    /// Operator who acknowledged, once acknowledged.
    pub user: Option<String>,
    pub acknowledgement_time: Option<DateTime<Utc>>,
    pub extension: Option<Vec<u8>>,
}

impl ArchiveItem for AcknowledgedMessage {
    fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }
}

/// Predicate bag for acknowledgement retrievals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcknowledgedMessageFilter {
    pub user_list: Vec<String>,
    pub state_list: Vec<AcknowledgementState>,
}

impl ItemFilter for AcknowledgedMessageFilter {
    fn apply(&self, query: &mut QueryBuilder) {
        query.and_in("a.user_name", &self.user_list);
        query.and_in_states("a.state", &self.state_list);
    }
}

/// Persistence strategy for acknowledgements.
pub enum AcknowledgedMessageKind {}

impl RecordKind for AcknowledgedMessageKind {
    type Item = AcknowledgedMessage;
    type Filter = AcknowledgedMessageFilter;

    const DISPLAY_NAME: &'static str = "acknowledged message";
    const TABLE: &'static str = "ack_messages";

    fn select_clause() -> String {
        "SELECT a.unique_id, a.generation_time, a.state, a.user_name, \
         a.acknowledgement_time, a.extension, \
         b.unique_id, b.generation_time, b.msg_id, b.text, b.source, b.severity, \
         b.linked_entity_id, b.extension \
         FROM ack_messages AS a JOIN messages AS b ON a.message_id = b.unique_id"
            .to_string()
    }

    fn qualifier() -> &'static str {
        "a."
    }

    fn decode(row: &rusqlite::Row<'_>) -> Result<AcknowledgedMessage, ArchiveError> {
        Ok(AcknowledgedMessage {
            unique_id: row.get(0)?,
            generation_time: from_micros(row.get(1)?),
            state: parse_enum(&row.get::<_, String>(2)?)?,
            user: row.get(3)?,
            acknowledgement_time: row.get::<_, Option<i64>>(4)?.map(from_micros),
            extension: row.get(5)?,
            message: decode_message_at(row, 6)?,
        })
    }

    /// Upsert keyed on `unique_id`: the first write of an entity inserts, a
    /// state change updates the existing row in place.
    fn persist(tx: &Transaction<'_>, items: &[AcknowledgedMessage]) -> Result<(), ArchiveError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO ack_messages (unique_id, generation_time, message_id, state, \
             user_name, acknowledgement_time, extension) VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(unique_id) DO UPDATE SET \
             generation_time = excluded.generation_time, \
             message_id = excluded.message_id, \
             state = excluded.state, \
             user_name = excluded.user_name, \
             acknowledgement_time = excluded.acknowledgement_time, \
             extension = excluded.extension",
        )?;
        for item in items {
            stmt.execute(params![
                item.unique_id,
                to_micros(item.generation_time),
                item.message.unique_id,
                item.state.as_ref(),
                item.user,
                item.acknowledgement_time.map(to_micros),
                item.extension,
            ])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::message::OperationalMessageKind;
    use crate::provider::ConnectionProvider;
    use crate::schema::init_schema;
    use crate::types::Severity;

    fn sample_message(id: i64, micros: i64) -> OperationalMessage {
        OperationalMessage {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            msg_id: format!("MSG-{id:03}"),
            text: "limit violation".to_string(),
            source: Some("monitoring".to_string()),
            severity: Severity::Alarm,
            linked_entity_id: Some(42),
            extension: None,
        }
    }

    fn pending(id: i64, micros: i64, message: OperationalMessage) -> AcknowledgedMessage {
        AcknowledgedMessage {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            message,
            state: AcknowledgementState::Pending,
            user: None,
            acknowledgement_time: None,
            extension: None,
        }
    }

    #[test]
    fn test_two_writes_converge_to_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::new(dir.path().join("archive.db")).unwrap();
        let mut conn = provider.create_connection(true).unwrap();
        init_schema(&conn).unwrap();

        let msg = sample_message(10, 100);
        let tx = conn.transaction().unwrap();
        OperationalMessageKind::persist(&tx, std::slice::from_ref(&msg)).unwrap();
        tx.commit().unwrap();

        let first = pending(1, 100, msg.clone());
        let mut second = first.clone();
        second.state = AcknowledgementState::Acknowledged;
        second.user = Some("operator-1".to_string());
        second.acknowledgement_time = Some(from_micros(250));

        let tx = conn.transaction().unwrap();
        AcknowledgedMessageKind::persist(&tx, &[first]).unwrap();
        tx.commit().unwrap();
        let tx = conn.transaction().unwrap();
        AcknowledgedMessageKind::persist(&tx, std::slice::from_ref(&second)).unwrap();
        tx.commit().unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM ack_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        let fetched = AcknowledgedMessageKind::fetch_by_id(&conn, UniqueId(1))
            .unwrap()
            .unwrap();
        assert_eq!(fetched, second);
    }

    #[test]
    fn test_state_filter_uses_joined_alias() {
        let mut q = QueryBuilder::new("SELECT 1");
        let filter = AcknowledgedMessageFilter {
            user_list: vec!["operator-1".to_string()],
            state_list: vec![AcknowledgementState::Pending],
        };
        filter.apply(&mut q);
        assert_eq!(
            q.sql(),
            "SELECT 1 AND a.user_name IN (?) AND a.state IN (?)"
        );
    }
}
