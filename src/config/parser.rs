use super::AppConfig;
use crate::errors::Error;
use std::fs;

use tracing::info;

/// Loads and parses the application configuration from a YAML file
///
/// # Arguments
///
/// * `file_path` - Path to the YAML configuration file
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be read, the YAML content cannot be
/// parsed, or one of the durations is not a valid humantime string
pub fn load_app_config(file_path: &str) -> Result<AppConfig, Error> {
    let yaml_str = fs::read_to_string(file_path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", file_path, e)))?;
    let config = parse_app_config(&yaml_str)?;
    info!(
        "Loaded configuration from {} ({} agent profiles)",
        file_path,
        config.agents.len()
    );
    Ok(config)
}

/// Parses a YAML document into an `AppConfig` and validates its durations
pub fn parse_app_config(yaml_str: &str) -> Result<AppConfig, Error> {
    let config: AppConfig =
        serde_yaml::from_str(yaml_str).map_err(|e| Error::Config(e.to_string()))?;
    config.coordinator.step_timeout()?;
    config.coordinator.tool_timeout()?;
    Ok(config)
}
