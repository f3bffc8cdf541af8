//! Errors raised at the remote boundary.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::model::JobStatus;

/// Errors returned by the durable store and change feed.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Job {id} is already {status} and cannot be modified")]
    TerminalConflict { id: String, status: JobStatus },

    #[error("Write rejected by store: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl GatewayError {
    /// True for a rejected write to a job that already reached a terminal
    /// status. Concurrent terminal writers treat this as a no-op.
    pub fn is_terminal_conflict(&self) -> bool {
        matches!(self, GatewayError::TerminalConflict { .. })
    }
}

/// Errors returned by the scrape trigger call. Any of them means the
/// worker never started.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Scraper returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Scraper refused the job: {0}")]
    Refused(String),

    #[error("Failed to reach scraper: {0}")]
    Transport(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
