use async_trait::async_trait;
use thiserror::Error;

use super::types::{OptionSpec, PluginOptions};
use crate::reporter::{Reporter, ReporterError};

/// Plugin errors
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),
    #[error("missing required option: {0}")]
    MissingOption(String),
    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("plugin failed: {0}")]
    Failed(String),
    #[error("plugin panicked: {0}")]
    Panicked(String),
}

/// Errors returned by a [`Task`]
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Reporter(#[from] ReporterError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// One unit of download work
///
/// Receives the worker slot it runs in and a reporter bound to that slot.
/// Tasks run on the blocking thread pool, so blocking I/O is fine.
pub type Task = Box<dyn FnOnce(usize, &Reporter) -> Result<(), TaskError> + Send + 'static>;

/// Lazy producer of tasks
///
/// Called from a single place only. `None` means there is no more work;
/// an `Err` halts the run.
pub type TaskGenerator = Box<dyn Iterator<Item = Result<Task, PluginError>> + Send + 'static>;

/// Number of tasks a generator is expected to yield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Total {
    Known(usize),
    Unknown,
}

/// Result of [`Plugin::download_generator`]
///
/// `generator` is `None` only for a malformed plugin; the manager treats it
/// as a fatal contract violation.
pub struct Generation {
    pub generator: Option<TaskGenerator>,
    pub total: Total,
}

impl Generation {
    pub fn new(generator: TaskGenerator, total: Total) -> Self {
        Self {
            generator: Some(generator),
            total,
        }
    }

    /// Wrap an iterator of tasks whose length is known up front
    pub fn from_tasks<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = Task>,
        I::IntoIter: ExactSizeIterator + Send + 'static,
    {
        let tasks = tasks.into_iter();
        let total = Total::Known(tasks.len());
        Self::new(Box::new(tasks.map(Ok::<Task, PluginError>)), total)
    }
}

/// Site plugin trait
///
/// A plugin turns one source URL into a stream of [`Task`]s. Setup work
/// (login, fetching an index) belongs in `download_generator`, which is async.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        ""
    }

    /// Whether this plugin knows how to download `url`
    fn can_handle(&self, url: &str) -> bool;

    /// Option schema; values are resolved into [`PluginOptions`] before a run
    fn options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    /// Prepare a task generator for `url`
    async fn download_generator(
        &self,
        url: &str,
        options: &PluginOptions,
    ) -> Result<Generation, PluginError>;
}
