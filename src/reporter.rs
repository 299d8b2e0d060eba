//! Per-task capability object for sandboxed, instrumented file output
//!
//! Every [`Reporter`] is bound to one worker slot and to the [`RunContext`]
//! shared by all tasks of a run. Paths given to a reporter are relative to the
//! run's output directory; absolute paths are rejected before any I/O.

use std::fs::{self, DirBuilder, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::manager::progress::Aggregator;
use crate::observability::Metrics;
use crate::pipeline::{CopyError, IoController, copy_through};

#[cfg(unix)]
const DIR_PERMISSIONS: u32 = 0o755;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("not a relative path: {}", .0.display())]
    NotRelative(PathBuf),

    #[error("path escapes the output directory: {}", .0.display())]
    EscapesOutputDir(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error("completion channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ReporterError>;

/// State shared by every reporter of one run
pub struct RunContext {
    output_dir: PathBuf,
    staging_dir: PathBuf,
    plugin_name: String,
    saved: mpsc::Sender<PathBuf>,
    progress: Arc<Aggregator>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
    // Serializes create-if-missing across all reporters of the run.
    dir_lock: Mutex<()>,
}

impl RunContext {
    pub(crate) fn new(
        output_dir: PathBuf,
        staging_dir: PathBuf,
        plugin_name: String,
        saved: mpsc::Sender<PathBuf>,
        progress: Arc<Aggregator>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            output_dir,
            staging_dir,
            plugin_name,
            saved,
            progress,
            metrics,
            cancel,
            dir_lock: Mutex::new(()),
        }
    }

    pub(crate) fn progress(&self) -> &Arc<Aggregator> {
        &self.progress
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}

/// Capability object handed to each task
pub struct Reporter {
    ctx: Arc<RunContext>,
    slot: usize,
}

impl Reporter {
    pub(crate) fn new(ctx: Arc<RunContext>, slot: usize) -> Self {
        Self { ctx, slot }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn plugin_name(&self) -> &str {
        &self.ctx.plugin_name
    }

    /// Whether the run has been cancelled; long tasks should check this
    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    /// Create `rel` for writing, emitting its path when the writer is closed
    pub fn file_writer(&self, rel: impl AsRef<Path>, report: bool) -> Result<IoController<File>> {
        let dst = self.resolve(rel.as_ref())?;
        self.make_directories(&dst)?;
        let file = File::create(&dst)?;

        let mut ctrl = IoController::new(file);
        self.instrument(&mut ctrl, report);

        let ctx = self.ctx.clone();
        ctrl.on_close(move || {
            emit(&ctx, dst).map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
        });

        Ok(ctrl)
    }

    /// Copy `src` into `dst`, always reporting progress
    pub fn copy<W, R>(&self, dst: &mut W, src: &mut R) -> Result<u64>
    where
        W: Write + ?Sized,
        R: Read + ?Sized,
    {
        let mut ctrl = IoController::new(dst);
        self.instrument(&mut ctrl, true);
        Ok(copy_through(&mut ctrl, src)?)
    }

    /// Write `src` to `rel`; the path is emitted only after a complete copy
    pub fn save_data<R>(&self, rel: impl AsRef<Path>, src: &mut R, report: bool) -> Result<u64>
    where
        R: Read + ?Sized,
    {
        let dst = self.resolve(rel.as_ref())?;
        self.make_directories(&dst)?;
        let file = File::create(&dst)?;

        let mut ctrl = IoController::new(file);
        self.instrument(&mut ctrl, report);
        let written = copy_through(&mut ctrl, src)?;
        ctrl.close()?;

        emit(&self.ctx, dst)?;
        Ok(written)
    }

    /// Move an already materialized file into place
    ///
    /// Returns the size of the moved file. Both paths should live on the same
    /// filesystem; files from [`Reporter::temp_file`] always do.
    pub fn save_file(&self, rel: impl AsRef<Path>, src: impl AsRef<Path>) -> Result<u64> {
        let dst = self.resolve(rel.as_ref())?;
        let size = fs::metadata(src.as_ref())?.len();

        self.make_directories(&dst)?;
        fs::rename(src.as_ref(), &dst)?;
        self.ctx.metrics.bytes_written(size);

        emit(&self.ctx, dst)?;
        Ok(size)
    }

    /// Scratch file under the run's hidden staging directory
    pub fn temp_file(&self) -> Result<NamedTempFile> {
        self.create_dir_if_missing(&self.ctx.staging_dir)?;

        let prefix = format!("batchdl-{}-", self.ctx.plugin_name);
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(&self.ctx.staging_dir)?;

        debug!(path = %file.path().display(), slot = self.slot, "Temporary file created");
        Ok(file)
    }

    fn resolve(&self, rel: &Path) -> Result<PathBuf> {
        if rel.is_absolute() || rel.has_root() {
            return Err(ReporterError::NotRelative(rel.to_path_buf()));
        }
        if rel.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_))) {
            return Err(ReporterError::EscapesOutputDir(rel.to_path_buf()));
        }

        Ok(self.ctx.output_dir.join(rel))
    }

    fn make_directories(&self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => self.create_dir_if_missing(dir),
            _ => Ok(()),
        }
    }

    fn create_dir_if_missing(&self, dir: &Path) -> Result<()> {
        let _guard = self
            .ctx
            .dir_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match fs::metadata(dir) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %dir.display(), "Creating non-existing directories");
                let mut builder = DirBuilder::new();
                builder.recursive(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::DirBuilderExt;
                    builder.mode(DIR_PERMISSIONS);
                }
                builder.create(dir)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Register the standard observers on a pipeline
    fn instrument<W: Write>(&self, ctrl: &mut IoController<W>, report: bool) {
        let cancel = self.ctx.cancel.clone();
        ctrl.on_data(move |_| {
            if cancel.is_cancelled() {
                Err(io::Error::new(io::ErrorKind::Other, "download cancelled"))
            } else {
                Ok(())
            }
        });

        let metrics = self.ctx.metrics.clone();
        ctrl.on_data(move |chunk| {
            metrics.bytes_written(chunk.len() as u64);
            Ok(())
        });

        if report {
            let progress = self.ctx.progress.clone();
            let slot = self.slot;
            ctrl.on_data(move |chunk| {
                progress.record_bytes(slot, chunk.len());
                Ok(())
            });
        }
    }
}

/// Hand a finalized artifact to the collector
fn emit(ctx: &RunContext, path: PathBuf) -> Result<()> {
    ctx.saved
        .blocking_send(path)
        .map_err(|_| ReporterError::ChannelClosed)?;
    ctx.metrics.file_saved();
    Ok(())
}
