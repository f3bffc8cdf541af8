//! SQLite persistence behind the bundled store backend.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod lead_repo;
pub mod migrations;

pub use error::DatabaseError;

/// The store's one SQLite connection, shared by clones.
///
/// A `with_conn` closure holds the lock for its whole body, which makes a
/// read-decide-write inside it atomic.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the file at `path` in WAL mode and migrates it.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::CreateDir {
                dir: dir.to_path_buf(),
                source,
            })?;
        }

        let db = Self::migrated(Connection::open(path)?, "PRAGMA journal_mode=WAL;")?;
        log::info!("Store database ready at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(Connection::open_in_memory()?, "")
    }

    fn migrated(conn: Connection, pragmas: &str) -> Result<Self, DatabaseError> {
        conn.execute_batch(&format!("{}PRAGMA foreign_keys=ON;", pragmas))?;
        let applied = migrations::run_all(&conn)?;
        if applied > 0 {
            log::debug!("Migrated store schema by {} versions", applied);
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => {
                log::warn!("Database lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        f(&conn)
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(
    table: &'static str,
    id: &str,
    s: &str,
) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table,
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}
