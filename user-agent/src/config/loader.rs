// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `logger.toml` into [`LoggerConfig`]. The file is optional: when it
//! does not exist the built-in defaults apply.

use crate::config::model::{ConfigError, LoggerConfig};
use crate::logger_log;
use log::Level;
use std::{fs, io, path::Path};

/// Name of the optional config file next to the executable.
pub const CONFIG_FILE: &str = "logger.toml";

/// Load and parse the configuration from `path`.
/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load(path: &Path) -> Result<LoggerConfig, ConfigError> {
    let txt = match fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            logger_log!(Level::Debug, "config", "{:?} not found, using defaults", path);
            return Ok(LoggerConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    let cfg = parse(&txt)?;
    logger_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

pub fn parse(txt: &str) -> Result<LoggerConfig, ConfigError> {
    Ok(toml::from_str(txt)?)
}
