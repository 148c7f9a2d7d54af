//! Public API for configuration

pub mod loader;
pub mod model;

// Re-export the main entrypoints:
pub use loader::{load, CONFIG_FILE};
pub use model::{ConfigError, LoggerConfig, LoggingConfig, PortConfig, SinkConfig};
