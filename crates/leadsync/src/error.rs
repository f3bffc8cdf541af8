use std::path::PathBuf;
use thiserror::Error;

use crate::gateway::{GatewayError, TriggerError};
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Scraper did not start for job {job_id}: {source}")]
    TriggerFailed {
        job_id: String,
        #[source]
        source: TriggerError,
    },

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Invalid job parameters: {0}")]
    InvalidParams(String),

    #[error("Sync engine has no active owner session")]
    NotStarted,

    #[error("Job create for {owner_id} ended abnormally: {reason}")]
    CreateAborted { owner_id: String, reason: String },

    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}
