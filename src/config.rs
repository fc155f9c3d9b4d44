//! Configuration for the GrihaIO daemon
//!
//! Loads configuration from a TOML file: network bind address, profile store
//! location, log level and the list of hardware modules to drive.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub profiles: ProfileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Hardware modules, loaded in order; the order determines module ids
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,
}

/// TCP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// TCP bind address for the control protocol
    ///
    /// Examples:
    /// - `0.0.0.0:8585` - Bind to all interfaces
    /// - `127.0.0.1:8585` - Localhost only
    pub bind_address: String,
}

/// Profile persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// Path of the binary profile store, rewritten atomically on every change
    pub store_path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One `[[module]]` entry: a driver plus its hardware link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// Driver name: "stub", "cul" or "onkyo_av"
    pub driver: String,
    /// Serial port path, required by the serial drivers
    pub port: Option<String>,
    /// Baud rate, driver-specific default when omitted
    pub baud: Option<u32>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}
