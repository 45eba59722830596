//! Configuration module for nfqlb
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use nfqlb::config::{load_config, Config};
//!
//! let config = load_config("/etc/nfqlb/config.json").unwrap();
//! println!("Backends: {}", config.balancer.backends.len());
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{BalancerConfig, Config, FragmentsConfig, LogConfig, QueueConfig};
