//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::dispatch::FailurePolicy;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: queues={:?}, {} backends, table_size={}",
        config.queue.queues,
        config.balancer.backends.len(),
        config.balancer.table_size
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `NFQLB_LOG_LEVEL`: Override log level
/// - `NFQLB_QUEUES`: Comma separated queue numbers
/// - `NFQLB_FAILURE_POLICY`: `fail_open` or `fail_closed`
/// - `NFQLB_UDP_ENCAP_PORT`: UDP port carrying encapsulated SCTP
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = load_config(path)?;
    apply_env_overrides(config, |name| std::env::var(name).ok())
}

/// Apply overrides read through `lookup`, then validate again
pub(crate) fn apply_env_overrides(
    mut config: Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(level) = lookup("NFQLB_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(queues) = lookup("NFQLB_QUEUES") {
        config.queue.queues = parse_queue_list(&queues).ok_or_else(|| ConfigError::EnvError {
            name: "NFQLB_QUEUES".into(),
            reason: format!("Invalid queue list: {queues}"),
        })?;
        debug!("Queues overridden to {:?}", config.queue.queues);
    }

    if let Some(policy) = lookup("NFQLB_FAILURE_POLICY") {
        config.queue.failure_policy =
            policy
                .parse::<FailurePolicy>()
                .map_err(|reason| ConfigError::EnvError {
                    name: "NFQLB_FAILURE_POLICY".into(),
                    reason,
                })?;
        debug!("Failure policy overridden to {}", config.queue.failure_policy);
    }

    if let Some(port) = lookup("NFQLB_UDP_ENCAP_PORT") {
        config.balancer.udp_encap_port = port.trim().parse().map_err(|_| ConfigError::EnvError {
            name: "NFQLB_UDP_ENCAP_PORT".into(),
            reason: format!("Invalid port: {port}"),
        })?;
        debug!(
            "UDP encapsulation port overridden to {}",
            config.balancer.udp_encap_port
        );
    }

    config.validate()?;

    Ok(config)
}

fn parse_queue_list(s: &str) -> Option<Vec<u16>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
