//! Configuration file loading and parsing.

use std::path::Path;

use anyhow::{Context, Result};

use super::model::AppConfig;
use crate::error::ConfigError;

/// Loads the configuration file from disk and parses it.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: AppConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(config)
}

/// Loads and fully validates the configuration file.
pub fn load_and_validate(path: &Path) -> Result<AppConfig> {
    let config = load_from_path(path).context("Failed to load configuration")?;
    validate(&config)?;
    Ok(config)
}

/// Checks invariants that serde defaults cannot express. Fatal at startup only.
fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.admin.token.trim().is_empty() {
        return Err(ConfigError::Invalid("admin.token must not be empty".into()));
    }
    if config.library.storages.is_empty() {
        return Err(ConfigError::Invalid(
            "library.storages must list at least one remote storage".into(),
        ));
    }
    if config
        .library
        .storages
        .iter()
        .any(|s| s.name.trim().is_empty())
    {
        return Err(ConfigError::Invalid(
            "library.storages entries must be named".into(),
        ));
    }

    let t = &config.timings;
    if t.request_sweep_secs == 0 || t.request_timeout_base_secs == 0 {
        return Err(ConfigError::Invalid(
            "timings.request_sweep_secs and timings.request_timeout_base_secs must be non-zero"
                .into(),
        ));
    }
    if t.worker_wait_ms == 0 || t.worker_status_ms == 0 || t.request_pick_ms == 0 {
        return Err(ConfigError::Invalid(
            "broker wait timings must be non-zero".into(),
        ));
    }

    Ok(())
}
