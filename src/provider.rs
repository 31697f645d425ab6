//! Connection provisioning for archive instances.
//!
//! Each per-kind archive owns two independent connections minted here: one
//! for writes (WAL mode, used by flushes, purge and remove) and one for
//! retrievals. The write connection can be re-minted after an unrecoverable
//! rollback failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::ArchiveError;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Mints write and read connections against one archive database file.
#[derive(Clone)]
pub struct ConnectionProvider {
    db_path: PathBuf,
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl ConnectionProvider {
    /// Create a provider for the given database file, creating the parent
    /// directory if it does not exist yet.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ArchiveError::Internal(format!(
                        "cannot create archive directory '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        Ok(ConnectionProvider { db_path })
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    /// Mint a new connection.
    ///
    /// Write connections run in WAL journal mode with normal synchronous
    /// writes; read connections are opened read-only and rely on WAL for
    /// concurrent access to the live writer's data.
    pub fn create_connection(&self, for_writing: bool) -> Result<Connection, ArchiveError> {
        let conn = if for_writing {
            let conn = Connection::open(&self.db_path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn
        } else {
            Connection::open_with_flags(
                &self.db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("data").join("archive.db");
        let provider = ConnectionProvider::new(&nested).unwrap();
        assert!(nested.parent().unwrap().exists());

        let conn = provider.create_connection(true).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
    }

    #[test]
    fn test_read_connection_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let provider = ConnectionProvider::new(&path).unwrap();

        let writer = provider.create_connection(true).unwrap();
        writer.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();

        let reader = provider.create_connection(false).unwrap();
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(reader.execute("INSERT INTO t VALUES (1)", []).is_err());
    }
}
