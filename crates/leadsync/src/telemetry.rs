//! Process-wide logging setup.
//!
//! Library code logs through the `log` facade; this installs a `tracing`
//! subscriber and bridges `log` records into it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, SyncError};

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info,leadsync=debug";

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::try_from_default_env().map_err(|e| SyncError::Telemetry(e.to_string()));
    }
    EnvFilter::try_new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER))
        .map_err(|e| SyncError::Telemetry(e.to_string()))
}

/// Installs the global subscriber. Fails only if one is already installed;
/// an existing `log` logger leaves `log` records unbridged.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(config)?;

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_target(true).with_current_span(true));
    let text_layer = (!config.json).then(|| fmt::layer().with_target(true));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SyncError::Telemetry(e.to_string()))?;
    // The subscriber is live from here on, so a taken `log` slot only costs
    // the bridge.
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::warn!("log records will not reach tracing: {}", e);
    }

    tracing::info!(json = config.json, "Logging initialized");
    Ok(())
}
