use thiserror::Error;
use tokio::task::JoinError;

use crate::plugins::{PluginError, TaskError};

/// Fatal errors ending a download run
///
/// Only the first fatal error observed during a run is returned; later
/// failures from concurrently running workers are discarded.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("max_workers must be at least 1")]
    InvalidWorkerCount,

    #[error("plugin returned no task generator")]
    NilGenerator,

    #[error("no downloadable tasks found")]
    NoTasks {
        #[source]
        source: Option<PluginError>,
    },

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("worker #{slot} failed: {source}")]
    Task {
        slot: usize,
        #[source]
        source: TaskError,
    },

    #[error("worker #{slot} panicked: {message}")]
    WorkerPanicked { slot: usize, message: String },

    #[error("spawner panicked: {0}")]
    SpawnerPanicked(String),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether the plugin produced no work at all
    pub fn is_empty_run(&self) -> bool {
        matches!(self, DownloadError::NoTasks { .. })
    }
}

/// Human-readable message from a failed join
pub(crate) fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
