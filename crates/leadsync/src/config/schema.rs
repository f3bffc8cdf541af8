use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime settings of the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Job-list refetch interval while any job is active.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Interval between timeout sweeps.
    #[serde(default = "default_sweep_interval")]
    pub timeout_sweep_interval_secs: u64,
    /// How long a job may stay `processing` before it is forced to `failed`.
    #[serde(default = "default_processing_deadline")]
    pub processing_deadline_secs: u64,
    /// How long a job may stay `pending`. Unset disables the check.
    #[serde(default)]
    pub pending_deadline_secs: Option<u64>,
    #[serde(default = "default_cache_event_capacity")]
    pub cache_event_capacity: usize,
    #[serde(default = "default_change_feed_capacity")]
    pub change_feed_capacity: usize,
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_processing_deadline() -> u64 {
    15 * 60
}

fn default_cache_event_capacity() -> usize {
    256
}

fn default_change_feed_capacity() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_sweep_interval_secs: default_sweep_interval(),
            processing_deadline_secs: default_processing_deadline(),
            pending_deadline_secs: None,
            cache_event_capacity: default_cache_event_capacity(),
            change_feed_capacity: default_change_feed_capacity(),
            trigger: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_sweep_interval_secs)
    }

    pub fn processing_deadline(&self) -> Duration {
        Duration::from_secs(self.processing_deadline_secs)
    }

    pub fn pending_deadline(&self) -> Option<Duration> {
        self.pending_deadline_secs.map(Duration::from_secs)
    }
}

/// Where and how to reach the scraping worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub url: String,
    /// Inline bearer token.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub token_env_var: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl TriggerConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            token: None,
            token_file: None,
            token_env_var: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub filter: Option<String>,
}
