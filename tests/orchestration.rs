//! Integration tests for the download manager
//!
//! A scripted plugin stands in for a real site: each test hands it a closure
//! that builds the task generator, and the run writes into a temporary
//! output directory.

use async_trait::async_trait;
use batchdl::manager::{DownloadError, DownloadManager, ManagerSettings};
use batchdl::plugins::{Generation, Plugin, PluginError, PluginOptions, Task, TaskError, Total};
use batchdl::reporter::Reporter;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

type Script = Box<dyn Fn() -> Generation + Send + Sync>;

struct ScriptedPlugin {
    script: Script,
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        "scripted"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("test://")
    }

    async fn download_generator(
        &self,
        _url: &str,
        _options: &PluginOptions,
    ) -> Result<Generation, PluginError> {
        Ok((self.script)())
    }
}

fn manager(dir: &TempDir, script: impl Fn() -> Generation + Send + Sync + 'static) -> DownloadManager {
    let plugin = Arc::new(ScriptedPlugin {
        script: Box::new(script),
    });
    DownloadManager::new(plugin, PluginOptions::default(), ManagerSettings::new(dir.path()))
}

/// Task writing `size` bytes of `slot`-derived data to `file-<slot>.bin`
fn write_task(size: usize) -> Task {
    Box::new(move |slot: usize, reporter: &Reporter| -> Result<(), TaskError> {
        let data = vec![slot as u8; size];
        let mut src: &[u8] = &data;
        reporter.save_data(format!("file-{}.bin", slot), &mut src, true)?;
        Ok(())
    })
}

fn file_tasks(count: usize, size: usize) -> Generation {
    Generation::from_tasks((0..count).map(|_| write_task(size)).collect::<Vec<_>>())
}

fn file_names(paths: &[std::path::PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_downloads_every_task() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || file_tasks(10, 4096));

    let paths = manager.download("test://gallery", 3).await.unwrap();

    assert_eq!(paths.len(), 10);
    let mut expected: Vec<String> = (0..10).map(|i| format!("file-{}.bin", i)).collect();
    expected.sort();
    assert_eq!(file_names(&paths), expected);

    for path in &paths {
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::metadata(path).unwrap().len(), 4096);
    }

    let progress = manager.progress_string();
    assert!(progress.starts_with("10 of 10 files (100%)"), "{}", progress);
    assert!(manager.progress().unwrap().is_complete());

    let metrics = manager.metrics();
    assert_eq!(metrics.tasks_spawned, 10);
    assert_eq!(metrics.files_saved, 10);
    assert_eq!(metrics.bytes_written, 10 * 4096);
}

#[tokio::test]
async fn test_never_exceeds_max_workers() {
    let dir = TempDir::new().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (active_c, peak_c) = (active.clone(), peak.clone());
    let manager = manager(&dir, move || {
        let tasks: Vec<Task> = (0..12)
            .map(|_| {
                let active = active_c.clone();
                let peak = peak_c.clone();
                let task: Task = Box::new(move |slot: usize, reporter: &Reporter| -> Result<(), TaskError> {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);

                    let mut src: &[u8] = b"ok";
                    reporter.save_data(format!("{}.txt", slot), &mut src, false)?;
                    Ok(())
                });
                task
            })
            .collect();
        Generation::from_tasks(tasks)
    });

    let paths = manager.download("test://slow", 3).await.unwrap();

    assert_eq!(paths.len(), 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejects_zero_workers() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || file_tasks(1, 1));

    let result = manager.download("test://x", 0).await;
    assert!(matches!(result, Err(DownloadError::InvalidWorkerCount)));
}

#[tokio::test]
async fn test_missing_generator_is_fatal() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || Generation {
        generator: None,
        total: Total::Unknown,
    });

    let result = manager.download("test://x", 2).await;
    assert!(matches!(result, Err(DownloadError::NilGenerator)));
}

#[tokio::test]
async fn test_empty_generator_reports_no_tasks() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || file_tasks(0, 0));

    let err = manager.download("test://empty", 2).await.unwrap_err();
    assert!(err.is_empty_run());
    assert!(matches!(err, DownloadError::NoTasks { source: None }));
}

#[tokio::test]
async fn test_generator_error_before_any_task() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || {
        Generation::new(
            Box::new(std::iter::once(Err(PluginError::Failed(
                "index unavailable".to_string(),
            )))),
            Total::Unknown,
        )
    });

    let err = manager.download("test://broken", 2).await.unwrap_err();
    match err {
        DownloadError::NoTasks { source: Some(PluginError::Failed(msg)) } => {
            assert_eq!(msg, "index unavailable");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_generator_error_after_tasks() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || {
        let items = (0..2)
            .map(|_| Ok(write_task(8)))
            .chain(std::iter::once(Err(PluginError::Failed("page 2".to_string()))));
        Generation::new(Box::new(items), Total::Unknown)
    });

    let err = manager.download("test://partial", 1).await.unwrap_err();
    assert!(matches!(err, DownloadError::Plugin(PluginError::Failed(_))));

    // Work spawned before the error still completes.
    assert!(dir.path().join("file-0.bin").exists());
    assert!(dir.path().join("file-1.bin").exists());
}

/// Generator yielding `tasks` write tasks, then panicking on the next call
fn panicking_generator(tasks: usize) -> Generation {
    let mut calls = 0usize;
    let items = std::iter::from_fn(move || {
        calls += 1;
        if calls > tasks {
            panic!("index parser crashed");
        }
        Some(Ok::<Task, PluginError>(write_task(8)))
    });
    Generation::new(Box::new(items), Total::Unknown)
}

#[tokio::test]
async fn test_generator_panic_after_tasks() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || panicking_generator(2));

    let err = manager.download("test://crash", 2).await.unwrap_err();
    match err {
        DownloadError::Plugin(PluginError::Panicked(message)) => {
            assert!(message.contains("index parser crashed"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert!(dir.path().join("file-0.bin").exists());
    assert!(dir.path().join("file-1.bin").exists());

    // The runtime is still usable.
    let again = manager.download("test://crash", 2).await;
    assert!(matches!(again, Err(DownloadError::Plugin(PluginError::Panicked(_)))));
}

#[tokio::test]
async fn test_generator_panic_before_any_task() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || panicking_generator(0));

    let err = manager.download("test://crash", 2).await.unwrap_err();
    assert!(
        matches!(err, DownloadError::NoTasks { source: Some(PluginError::Panicked(_)) }),
        "{:?}",
        err
    );
    assert_eq!(manager.metrics().tasks_spawned, 0);
}

#[tokio::test]
async fn test_first_task_error_stops_the_run() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || {
        let tasks: Vec<Task> = (0..6)
            .map(|i| {
                if i == 3 {
                    let task: Task = Box::new(|_slot: usize, _reporter: &Reporter| -> Result<(), TaskError> {
                        Err(TaskError::Io(std::io::Error::other("connection reset")))
                    });
                    task
                } else {
                    write_task(16)
                }
            })
            .collect();
        Generation::from_tasks(tasks)
    });

    let err = manager.download("test://flaky", 1).await.unwrap_err();
    assert!(matches!(err, DownloadError::Task { slot: 3, .. }), "{:?}", err);

    for slot in 0..3 {
        assert!(dir.path().join(format!("file-{}.bin", slot)).exists());
    }
    assert_eq!(manager.metrics().tasks_failed, 1);
}

#[tokio::test]
async fn test_worker_panic_is_reported_and_manager_recovers() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let runs_c = runs.clone();
    let manager = manager(&dir, move || {
        if runs_c.fetch_add(1, Ordering::SeqCst) == 0 {
            let task: Task = Box::new(|_slot: usize, _reporter: &Reporter| -> Result<(), TaskError> {
                panic!("decoder blew up")
            });
            Generation::from_tasks(vec![task])
        } else {
            file_tasks(2, 32)
        }
    });

    let err = manager.download("test://panics", 2).await.unwrap_err();
    match err {
        DownloadError::WorkerPanicked { slot, message } => {
            assert_eq!(slot, 0);
            assert!(message.contains("decoder blew up"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let paths = manager.download("test://panics", 2).await.unwrap();
    assert_eq!(paths.len(), 2);
}

#[tokio::test]
async fn test_cancel_stops_an_endless_generator() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || {
        let tasks = (0..).map(|_| {
            let task: Task = Box::new(|slot: usize, reporter: &Reporter| -> Result<(), TaskError> {
                std::thread::sleep(Duration::from_millis(5));
                let mut src: &[u8] = b"frame";
                reporter.save_data(format!("frames/{}.raw", slot), &mut src, true)?;
                Ok(())
            });
            Ok(task)
        });
        Generation::new(Box::new(tasks), Total::Unknown)
    });

    let token = manager.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(10), manager.download("test://live", 2))
        .await
        .expect("download did not stop after cancel");
    assert!(matches!(result, Err(DownloadError::Cancelled)));
}

#[tokio::test]
async fn test_staged_files_are_moved_into_place() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || {
        let tasks: Vec<Task> = (0..3)
            .map(|_| {
                let task: Task = Box::new(|slot: usize, reporter: &Reporter| -> Result<(), TaskError> {
                    let mut staged = reporter.temp_file()?;
                    staged.write_all(format!("staged {}", slot).as_bytes())?;
                    let (_, path) = staged.keep().map_err(|e| TaskError::Io(e.error))?;
                    reporter.save_file(Path::new("staged").join(format!("{}.txt", slot)), &path)?;
                    Ok(())
                });
                task
            })
            .collect();
        Generation::from_tasks(tasks)
    });

    let paths = manager.download("test://staged", 2).await.unwrap();

    assert_eq!(paths.len(), 3);
    for path in &paths {
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("staged "));
    }
    assert!(!dir.path().join(".tmp").exists());
}

#[tokio::test]
async fn test_escaping_paths_fail_the_task() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, || {
        let task: Task = Box::new(|_slot: usize, reporter: &Reporter| -> Result<(), TaskError> {
            let mut src: &[u8] = b"nope";
            reporter.save_data("../outside.bin", &mut src, true)?;
            Ok(())
        });
        Generation::from_tasks(vec![task])
    });

    let err = manager.download("test://escape", 1).await.unwrap_err();
    assert!(matches!(
        err,
        DownloadError::Task { source: TaskError::Reporter(_), .. }
    ));
    assert!(!dir.path().parent().unwrap().join("outside.bin").exists());
}

#[tokio::test]
async fn test_dropped_download_cancels_running_writes() {
    let dir = TempDir::new().unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    let finished_c = finished.clone();
    let manager = manager(&dir, move || {
        let finished = finished_c.clone();
        let task: Task = Box::new(move |_slot: usize, reporter: &Reporter| -> Result<(), TaskError> {
            std::thread::sleep(Duration::from_millis(300));
            let mut src: &[u8] = b"late";
            let saved = reporter.save_data("late.bin", &mut src, true);
            finished.fetch_add(1, Ordering::SeqCst);
            saved?;
            Ok(())
        });
        Generation::from_tasks(vec![task])
    });

    let dropped = tokio::time::timeout(
        Duration::from_millis(50),
        manager.download("test://slow", 1),
    )
    .await;
    assert!(dropped.is_err());
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    // The blocking body keeps running, but its writes see the cancellation.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    let metrics = manager.metrics();
    assert_eq!(metrics.files_saved, 0);
    assert_eq!(metrics.bytes_written, 0);
}
