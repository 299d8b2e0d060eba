//! Download orchestration
//!
//! [`DownloadManager`] drives one plugin: it asks the plugin for a task
//! generator, hands the generator to the scheduler, and collects completed
//! artifact paths until the scheduler reports done or failed.

mod error;
pub mod progress;
mod scheduler;

pub use error::DownloadError;
pub use progress::{Aggregator, ProgressSnapshot, WorkerSnapshot};

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::observability::{Metrics, MetricsSnapshot};
use crate::plugins::{Plugin, PluginOptions};
use crate::reporter::RunContext;
use error::panic_message;
use progress::display_name;
use scheduler::Scheduler;

/// Filesystem settings for a download manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Base directory every artifact path is relative to
    pub output_dir: PathBuf,
    /// Hidden subdirectory of `output_dir` holding temporary files
    pub staging_dir: String,
}

impl ManagerSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            staging_dir: ".tmp".to_string(),
        }
    }
}

impl From<&OutputConfig> for ManagerSettings {
    fn from(config: &OutputConfig) -> Self {
        Self {
            output_dir: config.directory.clone(),
            staging_dir: config.staging_dir.clone(),
        }
    }
}

/// Runs a plugin's tasks and aggregates their outcome
pub struct DownloadManager {
    plugin: Arc<dyn Plugin>,
    options: PluginOptions,
    settings: ManagerSettings,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
    progress: RwLock<Option<Arc<Aggregator>>>,
}

impl DownloadManager {
    pub fn new(plugin: Arc<dyn Plugin>, options: PluginOptions, settings: ManagerSettings) -> Self {
        Self {
            plugin,
            options,
            settings,
            metrics: Arc::new(Metrics::new()),
            cancel: CancellationToken::new(),
            progress: RwLock::new(None),
        }
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Download everything the plugin yields for `url`
    ///
    /// Returns the paths of all completed artifacts in completion order, or
    /// the first fatal error. On error no paths are returned, although files
    /// finished before the failure remain on disk.
    ///
    /// Dropping the returned future cancels the run, but task bodies already
    /// executing on the blocking pool cannot be aborted. They finish in the
    /// background after the dropped call has returned. Await the future after
    /// [`DownloadManager::cancel`] to wait for them instead.
    pub async fn download(&self, url: &str, max_workers: usize) -> Result<Vec<PathBuf>, DownloadError> {
        if max_workers == 0 {
            return Err(DownloadError::InvalidWorkerCount);
        }

        info!(plugin = self.plugin.name(), url, max_workers, "Starting download");

        let generation = self.plugin.download_generator(url, &self.options).await?;
        let generator = generation.generator.ok_or(DownloadError::NilGenerator)?;

        let progress = Arc::new(Aggregator::new(generation.total, max_workers));
        *self
            .progress
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(progress.clone());

        // Dropping this future cancels the run; workers are still drained.
        let cancel = self.cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let (saved_tx, mut saved_rx) = mpsc::channel(max_workers);
        let staging_dir = self.settings.output_dir.join(&self.settings.staging_dir);
        let ctx = Arc::new(RunContext::new(
            self.settings.output_dir.clone(),
            staging_dir,
            self.plugin.name().to_string(),
            saved_tx,
            progress.clone(),
            self.metrics.clone(),
            cancel,
        ));

        let mut spawner = tokio::spawn(Scheduler::new(ctx.clone(), max_workers).run(generator));

        let outcome = loop {
            tokio::select! {
                joined = &mut spawner => {
                    break joined.unwrap_or_else(|e| Err(DownloadError::SpawnerPanicked(panic_message(e))));
                }
                Some(path) = saved_rx.recv() => {
                    debug!(file = %display_name(&path), "Got file");
                    progress.record_completed(path);
                }
            }
        };

        // Completions queued before the spawner finished.
        while let Ok(path) = saved_rx.try_recv() {
            debug!(file = %display_name(&path), "Got file");
            progress.record_completed(path);
        }

        // Only removes the staging directory if tasks left nothing behind.
        let _ = tokio::fs::remove_dir(ctx.staging_dir()).await;

        match outcome {
            Ok(tasks) => {
                info!(tasks, files = progress.completed(), "Download finished");
                Ok(progress.paths())
            }
            Err(e) => {
                warn!(error = %e, files = progress.completed(), "Download failed");
                Err(e)
            }
        }
    }

    /// Human-readable progress of the current or last run
    pub fn progress_string(&self) -> String {
        self.progress()
            .map(|snapshot| snapshot.to_string())
            .unwrap_or_default()
    }

    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.progress
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|aggregator| aggregator.snapshot())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cancel the current run and any later run of this manager
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
