//! Configuration types for nfqlb
//!
//! This module defines all configuration structures used by the balancer.
//! Configuration is loaded from JSON files and validated at startup.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::FailurePolicy;
use crate::error::ConfigError;
use crate::lb::fragment::{FragmentConfig, DEFAULT_CAPACITY, DEFAULT_SHARDS};
use crate::lb::maglev::{is_prime, Backend, DEFAULT_TABLE_SIZE, MAX_TABLE_SIZE};
use crate::lb::state::{FwmarkConfig, DEFAULT_SHARED_NAME};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kernel queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Backend table and mark settings
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Fragment correlation cache
    #[serde(default)]
    pub fragments: FragmentsConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Seconds between statistics log lines (0 = disabled)
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            balancer: BalancerConfig::default(),
            fragments: FragmentsConfig::default(),
            log: LogConfig::default(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.balancer.validate()?;
        self.fragments.validate()?;
        self.log.validate()?;
        Ok(())
    }

    /// Create a minimal working configuration with three backends
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            balancer: BalancerConfig {
                backends: (1..=3).map(Backend::new).collect(),
                ..BalancerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Statistics interval, `None` when disabled
    #[must_use]
    pub const fn stats_interval(&self) -> Option<Duration> {
        if self.stats_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.stats_interval_secs))
        }
    }
}

/// Kernel queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueConfig {
    /// NFQUEUE numbers to bind, one worker each
    #[serde(default = "default_queues")]
    pub queues: Vec<u16>,

    /// Verdict for packets that cannot be balanced
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queues: default_queues(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Validate queue configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if no queue is listed or a queue repeats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::validation("At least one queue must be configured"));
        }
        let mut seen = HashSet::new();
        for q in &self.queues {
            if !seen.insert(q) {
                return Err(ConfigError::ValidationError(format!("Duplicate queue: {q}")));
            }
        }
        Ok(())
    }
}

/// Backend selection configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Maglev table size (prime)
    #[serde(default = "default_table_size")]
    pub table_size: usize,

    /// Backends; an empty list leaves the balancer without a table
    #[serde(default)]
    pub backends: Vec<Backend>,

    /// UDP destination port carrying encapsulated SCTP (0 = disabled)
    #[serde(default)]
    pub udp_encap_port: u16,

    /// Firewall mark encoding
    #[serde(default)]
    pub fwmark: FwmarkConfig,

    /// Name of the shared runtime state
    #[serde(default = "default_shared_name")]
    pub shared_name: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            table_size: DEFAULT_TABLE_SIZE,
            backends: Vec::new(),
            udp_encap_port: 0,
            fwmark: FwmarkConfig::default(),
            shared_name: default_shared_name(),
        }
    }
}

impl BalancerConfig {
    /// Validate balancer configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a non-prime, too small or
    /// too large table, invalid backends, or marks that overflow or collide with the
    /// own mark.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_size > MAX_TABLE_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "table_size {} exceeds the maximum of {MAX_TABLE_SIZE}",
                self.table_size
            )));
        }
        if !is_prime(self.table_size) {
            return Err(ConfigError::ValidationError(format!(
                "table_size {} must be prime",
                self.table_size
            )));
        }
        if self.table_size <= self.backends.len() {
            return Err(ConfigError::ValidationError(format!(
                "table_size {} must exceed the number of backends ({})",
                self.table_size,
                self.backends.len()
            )));
        }

        let mut ids = HashSet::new();
        for b in &self.backends {
            if b.weight == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Backend {} must have a positive weight",
                    b.id
                )));
            }
            if !ids.insert(b.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate backend id: {}",
                    b.id
                )));
            }
            if b.id.checked_add(self.fwmark.offset).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Backend {} overflows the mark with offset {}",
                    b.id, self.fwmark.offset
                )));
            }
            if self.fwmark.is_own(self.fwmark.encode(b.id)) {
                return Err(ConfigError::ValidationError(format!(
                    "Mark of backend {} equals the own mark {}",
                    b.id, self.fwmark.own
                )));
            }
        }

        if self.shared_name.is_empty() {
            return Err(ConfigError::validation("shared_name cannot be empty"));
        }

        Ok(())
    }
}

/// Fragment correlation configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FragmentsConfig {
    /// Maximum cached datagrams
    #[serde(default = "default_fragment_capacity")]
    pub capacity: usize,

    /// Entry lifetime in milliseconds
    #[serde(default = "default_fragment_ttl_ms")]
    pub ttl_ms: u64,

    /// Number of independently locked shards
    #[serde(default = "default_fragment_shards")]
    pub shards: usize,
}

impl Default for FragmentsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl_ms: default_fragment_ttl_ms(),
            shards: DEFAULT_SHARDS,
        }
    }
}

impl FragmentsConfig {
    /// Validate fragment cache configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a value is zero or there
    /// are more shards than entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::validation("fragments.capacity must be greater than 0"));
        }
        if self.ttl_ms == 0 {
            return Err(ConfigError::validation("fragments.ttl_ms must be greater than 0"));
        }
        if self.shards == 0 || self.shards > self.capacity {
            return Err(ConfigError::ValidationError(format!(
                "fragments.shards must be between 1 and capacity ({})",
                self.capacity
            )));
        }
        Ok(())
    }

    /// Entry lifetime as Duration
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Settings for [`crate::lb::fragment::FragmentCorrelator`]
    #[must_use]
    pub const fn to_fragment_config(&self) -> FragmentConfig {
        FragmentConfig::new(self.capacity, self.ttl(), self.shards)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

impl LogConfig {
    /// Validate logging configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an unknown level or format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}",
                self.level
            )));
        }
        if !matches!(self.format.as_str(), "json" | "text") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {} (expected json or text)",
                self.format
            )));
        }
        Ok(())
    }
}

fn default_queues() -> Vec<u16> {
    vec![2]
}

fn default_table_size() -> usize {
    DEFAULT_TABLE_SIZE
}

fn default_shared_name() -> String {
    DEFAULT_SHARED_NAME.into()
}

fn default_fragment_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_fragment_ttl_ms() -> u64 {
    1000
}

fn default_fragment_shards() -> usize {
    DEFAULT_SHARDS
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}

const fn default_true() -> bool {
    true
}

const fn default_stats_interval_secs() -> u64 {
    10
}
