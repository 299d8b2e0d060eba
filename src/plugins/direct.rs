use async_trait::async_trait;
use reqwest::Url;
use reqwest::blocking::Client;
use std::io;
use std::time::Duration;
use tracing::debug;

use super::traits::{Generation, Plugin, PluginError, Task, TaskError};
use super::types::{OptionSpec, PluginOptions};
use crate::pipeline::copy_through;
use crate::reporter::Reporter;

const DEFAULT_TIMEOUT_SECS: i64 = 60;
const FALLBACK_FILE_NAME: &str = "index.html";

/// Built-in plugin that saves a single HTTP(S) resource
///
/// Used when no site-specific plugin claims a URL.
#[derive(Debug, Clone, Default)]
pub struct DirectPlugin;

impl DirectPlugin {
    pub fn new() -> Self {
        Self
    }
}

/// Output name for `url`: the override, else the last path segment
pub fn file_name_for(url: &Url, name_override: Option<&str>) -> String {
    if let Some(name) = name_override.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }

    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[async_trait]
impl Plugin for DirectPlugin {
    fn name(&self) -> &str {
        "direct"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn can_handle(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::string("Filename")
                .with_comment("Output file name; defaults to the last URL path segment"),
            OptionSpec::string("UserAgent")
                .with_default(concat!("batchdl/", env!("CARGO_PKG_VERSION")).into()),
            OptionSpec::int("TimeoutSecs", DEFAULT_TIMEOUT_SECS),
        ]
    }

    async fn download_generator(
        &self,
        url: &str,
        options: &PluginOptions,
    ) -> Result<Generation, PluginError> {
        let parsed = Url::parse(url).map_err(|_| PluginError::UnsupportedUrl(url.to_string()))?;
        if !self.can_handle(url) {
            return Err(PluginError::UnsupportedUrl(url.to_string()));
        }

        let timeout_secs = options.get_int("TimeoutSecs").unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs <= 0 {
            return Err(PluginError::InvalidOption {
                key: "TimeoutSecs".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let file_name = file_name_for(&parsed, options.get_str("Filename"));
        let user_agent = options.get_str("UserAgent").map(str::to_string);
        let timeout = Duration::from_secs(timeout_secs as u64);

        let task: Task = Box::new(move |slot: usize, reporter: &Reporter| {
            fetch(parsed, &file_name, user_agent, timeout, slot, reporter)
        });

        Ok(Generation::from_tasks(vec![task]))
    }
}

fn fetch(
    url: Url,
    file_name: &str,
    user_agent: Option<String>,
    timeout: Duration,
    slot: usize,
    reporter: &Reporter,
) -> Result<(), TaskError> {
    // The blocking client owns a runtime, so it is built on the worker thread.
    let mut builder = Client::builder().timeout(timeout);
    if let Some(agent) = user_agent {
        builder = builder.user_agent(agent);
    }
    let client = builder
        .build()
        .map_err(|e| PluginError::Failed(format!("failed to build HTTP client: {}", e)))?;

    debug!(slot, url = %url, "Starting download");

    let mut response = client
        .get(url.clone())
        .send()
        .map_err(|e| PluginError::Failed(format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PluginError::Failed(format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        ))
        .into());
    }

    let mut writer = reporter.file_writer(file_name, true)?;
    let written = copy_through(&mut writer, &mut response).map_err(io::Error::from)?;
    writer.close()?;

    debug!(slot, url = %url, size = written, "Download completed");
    Ok(())
}
