//! Configuration model and persistence

pub mod config;

pub use config::{ConfigError, ConfigResult, ConfigurationManager, SystemConfig};
