pub mod bulk;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod secrets;
pub mod sync;
pub mod telemetry;

pub use bulk::BulkLeadMutator;
pub use cache::{CacheEntry, CacheEvent, CacheStore, LeadQuery, PageRequest, QueryKey, QueryScope};
pub use config::{load_config, load_config_from_str, SyncConfig};
pub use engine::SyncEngine;
pub use error::{ConfigError, Result, SyncError};
pub use gateway::{
    GatewayError, HttpScrapeTrigger, JobChangeFeed, JobGateway, LeadGateway, ScrapeTrigger,
    SqliteBackend, TriggerError, TriggerRequest,
};
pub use model::{Job, JobParams, JobPatch, JobStatus, Lead, LeadPatch, LeadStatus};
pub use orchestrator::{CreateJobOutcome, DuplicatePolicy, JobOrchestrator};
pub use secrets::{resolve_secret, SecretError};
pub use telemetry::init_logging;
