//! Versioned schema for the bundled store.
//!
//! `_migrations` records each applied version. Column additions check
//! `pragma_table_info` first so a hand-patched database still upgrades.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

enum Step {
    Script(&'static str),
    AddColumn {
        table: &'static str,
        column: &'static str,
        ddl: &'static str,
    },
}

struct SchemaVersion {
    version: u32,
    name: &'static str,
    step: Step,
}

const SCHEMA: &[SchemaVersion] = &[
    SchemaVersion {
        version: 1,
        name: "scrape_jobs",
        step: Step::Script(include_str!("sql/001_create_jobs.sql")),
    },
    SchemaVersion {
        version: 2,
        name: "leads",
        step: Step::Script(include_str!("sql/002_create_leads.sql")),
    },
    SchemaVersion {
        version: 3,
        name: "leads.notes",
        step: Step::AddColumn {
            table: "leads",
            column: "notes",
            ddl: include_str!("sql/003_add_notes_to_leads.sql"),
        },
    },
];

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(found > 0)
}

impl SchemaVersion {
    /// Runs the step and records the version in one transaction.
    fn apply(&self, conn: &Connection) -> Result<(), DatabaseError> {
        let sql = match &self.step {
            Step::Script(sql) => Some(*sql),
            Step::AddColumn { table, column, ddl } => {
                if has_column(conn, table, column)? {
                    log::debug!("{}.{} already present", table, column);
                    None
                } else {
                    Some(*ddl)
                }
            }
        };

        let tx = conn.unchecked_transaction()?;
        if let Some(sql) = sql {
            tx.execute_batch(sql).map_err(|source| DatabaseError::Schema {
                version: self.version,
                name: self.name,
                source,
            })?;
        }
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![self.version, self.name],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Brings the schema up to the latest version. Returns how many versions ran.
pub fn run_all(conn: &Connection) -> Result<usize, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?;

    let mut applied = 0;
    for schema in SCHEMA.iter().filter(|s| s.version > current) {
        log::info!("Applying schema v{} ({})", schema.version, schema.name);
        schema.apply(conn)?;
        applied += 1;
    }
    Ok(applied)
}
