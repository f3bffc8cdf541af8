use std::path::Path;

use crate::config::schema::SyncConfig;
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
    if config.poll_interval_secs == 0 {
        return Err(invalid("pollIntervalSecs must be greater than 0"));
    }
    if config.timeout_sweep_interval_secs == 0 {
        return Err(invalid("timeoutSweepIntervalSecs must be greater than 0"));
    }
    if config.poll_interval_secs >= config.timeout_sweep_interval_secs {
        return Err(invalid(format!(
            "pollIntervalSecs ({}) must be shorter than timeoutSweepIntervalSecs ({})",
            config.poll_interval_secs, config.timeout_sweep_interval_secs
        )));
    }
    if config.processing_deadline_secs <= config.timeout_sweep_interval_secs {
        return Err(invalid(format!(
            "processingDeadlineSecs ({}) must be longer than timeoutSweepIntervalSecs ({})",
            config.processing_deadline_secs, config.timeout_sweep_interval_secs
        )));
    }
    if let Some(pending) = config.pending_deadline_secs {
        if pending <= config.timeout_sweep_interval_secs {
            return Err(invalid(format!(
                "pendingDeadlineSecs ({}) must be longer than timeoutSweepIntervalSecs ({})",
                pending, config.timeout_sweep_interval_secs
            )));
        }
    }
    if config.cache_event_capacity == 0 || config.change_feed_capacity == 0 {
        return Err(invalid("channel capacities must be greater than 0"));
    }

    if let Some(trigger) = &config.trigger {
        if !(trigger.url.starts_with("http://") || trigger.url.starts_with("https://")) {
            return Err(invalid(format!(
                "trigger url must be http(s), got '{}'",
                trigger.url
            )));
        }
        if trigger.connect_timeout_secs == 0 || trigger.request_timeout_secs == 0 {
            return Err(invalid("trigger timeouts must be greater than 0"));
        }
        if !has_secret_source(
            trigger.token.as_deref(),
            trigger.token_file.as_deref(),
            trigger.token_env_var.as_deref(),
        ) {
            return Err(invalid(
                "trigger needs one of token, tokenFile or tokenEnvVar",
            ));
        }
    }

    Ok(())
}
