//! Configuration management for batchdl
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use batchdl::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Saving to: {}", config.output.directory.display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `BATCHDL__<section>__<key>`
//!
//! Examples:
//! - `BATCHDL__WORKERS__MAX_WORKERS=8`
//! - `BATCHDL__OUTPUT__DIRECTORY=/srv/downloads`
//! - `BATCHDL__LOGGING__FILTER=batchdl=debug`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/batchdl.toml`.
//! This can be overridden using the `BATCHDL_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{Config, LoggingConfig, OutputConfig, WorkersConfig};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`BATCHDL__*`)
    /// 2. TOML file (default: `config/batchdl.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
