// src/config/model.rs

use serde::Deserialize;
use shared::constants::{DEFAULT_LOG_FILE, LOGGER_PORT_NAME};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level `logger.toml`. Every table is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    #[serde(default)] pub logging: LoggingConfig,
    #[serde(default)] pub sink:    SinkConfig,
    #[serde(default)] pub port:    PortConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]                   pub enable: bool,
    #[serde(default)]                   pub file:   Option<String>,
    #[serde(default = "default_level")] pub level:  String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// Mirror of the `[sink]` table
#[derive(Debug, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_path")] pub path: PathBuf,
}
fn default_sink_path() -> PathBuf { PathBuf::from(DEFAULT_LOG_FILE) }

impl Default for SinkConfig {
    fn default() -> Self {
        Self { path: default_sink_path() }
    }
}

/// Mirror of the `[port]` table
#[derive(Debug, Deserialize)]
pub struct PortConfig {
    #[serde(default = "default_port_name")] pub name: String,
}
fn default_port_name() -> String { LOGGER_PORT_NAME.into() }

impl Default for PortConfig {
    fn default() -> Self {
        Self { name: default_port_name() }
    }
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be in {min}..={max}, got {value}")]
    OutOfRange { name: &'static str, value: u32, min: u32, max: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
