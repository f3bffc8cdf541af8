//! Bearer credential resolution for the scrape trigger.
//!
//! A credential may be given in one of three places, checked in order:
//!
//! 1. **Inline** in the config (`token`), for local development
//! 2. **File** (`tokenFile`), for mounted secrets
//! 3. **Environment variable** (`tokenEnvVar`)
//!
//! Empty values count as absent.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

/// Error type for credential resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No credential source configured (need one of: token, tokenFile, tokenEnvVar)")]
    NoSourceProvided,

    #[error("Failed to read credential from '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential file '{path}' is empty")]
    EmptyFile { path: PathBuf },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Resolves a credential from the first configured source.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&Path>,
    env_var: Option<&str>,
) -> Result<SecretString, SecretError> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }
    if let Some(path) = file_path.filter(|p| !p.as_os_str().is_empty()) {
        return read_secret_file(path);
    }
    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return read_secret_env(name);
    }
    Err(SecretError::NoSourceProvided)
}

/// True when at least one non-empty source is configured.
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&Path>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|p| !p.as_os_str().is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

fn read_secret_file(path: &Path) -> Result<SecretString, SecretError> {
    let path = expand_home(path);
    let content = std::fs::read_to_string(&path).map_err(|e| SecretError::FileRead {
        path: path.clone(),
        source: e,
    })?;
    let token = content.trim();
    if token.is_empty() {
        return Err(SecretError::EmptyFile { path });
    }
    Ok(SecretString::from(token.to_string()))
}

fn read_secret_env(name: &str) -> Result<SecretString, SecretError> {
    match std::env::var(name) {
        Ok(value) => Ok(SecretString::from(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
            name: name.to_string(),
        }),
        Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
            name: name.to_string(),
        }),
    }
}

/// Expands a leading `~` to the current user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
