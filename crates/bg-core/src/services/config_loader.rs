use std::collections::HashSet;
use std::path::Path;

use crate::error::{OrchestratorError, Result};
use crate::models::PlatformConfig;

pub const CONFIG_ENV_VAR: &str = "BG_CONFIG";
pub const DEFAULT_CONFIG_FILENAME: &str = "bluegreen.yaml";

pub fn load(config_path: &Path) -> Result<PlatformConfig> {
    if !config_path.exists() {
        return Err(OrchestratorError::ConfigNotFound(config_path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(config_path)?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<PlatformConfig> {
    let config: PlatformConfig = serde_yaml::from_str(contents)
        .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &PlatformConfig) -> Result<()> {
    if config.data_dir.as_os_str().is_empty() {
        return Err(OrchestratorError::InvalidConfig(
            "dataDir field is required".into(),
        ));
    }
    if config.health.timeout_secs == 0
        || config.health.poll_interval_secs == 0
        || config.runtime.command_timeout_secs == 0
        || config.runtime.pull_timeout_secs == 0
        || config.proxy.reload_timeout_secs == 0
        || config.sweep_interval_secs == 0
    {
        return Err(OrchestratorError::InvalidConfig(
            "timeouts and intervals must be greater than zero".into(),
        ));
    }
    if config.proxy.reload_command.is_empty() {
        return Err(OrchestratorError::InvalidConfig(
            "proxy.reloadCommand must name a program".into(),
        ));
    }
    let mut seen = HashSet::new();
    for entry in &config.api_keys {
        if entry.key.is_empty() {
            return Err(OrchestratorError::InvalidConfig("empty API key".into()));
        }
        if !seen.insert(entry.key.as_str()) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "duplicate API key for team '{}'",
                entry.team_id
            )));
        }
    }
    Ok(())
}
