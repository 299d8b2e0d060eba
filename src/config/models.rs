use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-plugin option tables, keyed by plugin name
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
}

impl Config {
    /// Configured options for `plugin`, empty when none are set
    pub fn plugin_options(&self, plugin: &str) -> Map<String, Value> {
        self.plugins
            .get(plugin)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// Output directory layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Hidden subdirectory for temporary files
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            staging_dir: default_staging_dir(),
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_staging_dir() -> String {
    ".tmp".to_string()
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
