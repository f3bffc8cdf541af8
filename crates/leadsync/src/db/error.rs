use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create database directory '{dir}': {source}")]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema v{version} ({name}) did not apply: {source}")]
    Schema {
        version: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored value could not be decoded into the model.
    #[error("Corrupt row in '{table}' ({id}): {reason}")]
    CorruptRow {
        table: &'static str,
        id: String,
        reason: String,
    },
}
