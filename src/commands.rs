use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::DownloadArgs;
use batchdl::config::Config;
use batchdl::manager::{DownloadError, DownloadManager, ManagerSettings};
use batchdl::plugins::{PluginOptions, PluginRegistry};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub async fn download(config: &Config, args: DownloadArgs) -> Result<(), AnyError> {
    let registry = PluginRegistry::with_defaults();
    let plugin = match &args.plugin {
        Some(name) => registry.get(name)?,
        None => registry.find_for_url(&args.url)?,
    };

    let mut provided = config.plugin_options(plugin.name());
    for (key, value) in args.options {
        provided.insert(key, Value::String(value));
    }
    let options = PluginOptions::resolve(&plugin.options(), &provided)?;

    let mut settings = ManagerSettings::from(&config.output);
    if let Some(output) = args.output {
        settings.output_dir = output;
    }
    let workers = args.workers.unwrap_or(config.workers.max_workers);

    let manager = DownloadManager::new(plugin, options, settings);
    let result = drive(&manager, &args.url, workers, tokio::signal::ctrl_c()).await;

    let paths = result?;
    info!("{}", manager.progress_string());
    for path in &paths {
        println!("{}", path.display());
    }

    Ok(())
}

/// Run a download, logging progress and cancelling once `interrupt` fires
async fn drive<S>(
    manager: &DownloadManager,
    url: &str,
    workers: usize,
    interrupt: S,
) -> Result<Vec<PathBuf>, DownloadError>
where
    S: Future,
{
    let download = manager.download(url, workers);
    tokio::pin!(download);
    tokio::pin!(interrupt);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let mut cancelled = false;
    loop {
        tokio::select! {
            result = &mut download => return result,
            _ = ticker.tick() => {
                let line = manager.progress_string();
                if !line.is_empty() {
                    info!("{}", line);
                }
            }
            _ = &mut interrupt, if !cancelled => {
                cancelled = true;
                warn!("Interrupted, cancelling download");
                manager.cancel();
            }
        }
    }
}

pub fn list_plugins() {
    let registry = PluginRegistry::with_defaults();

    for plugin in registry.plugins() {
        if plugin.version().is_empty() {
            println!("{}", plugin.name());
        } else {
            println!("{} {}", plugin.name(), plugin.version());
        }

        for option in plugin.options() {
            let mut line = format!("    {} ({})", option.key, option.kind);
            if option.required {
                line.push_str(" required");
            }
            if let Some(default) = &option.default {
                line.push_str(&format!(" default={}", default));
            }
            if let Some(comment) = &option.comment {
                line.push_str(&format!(" - {}", comment));
            }
            println!("{}", line);
        }
    }
}
