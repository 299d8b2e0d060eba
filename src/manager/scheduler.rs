//! Bounded worker scheduler
//!
//! Pulls tasks from a plugin generator and runs each on the blocking pool,
//! never more than `max_workers` at a time. The first fatal error stops
//! spawning; in-flight workers are always drained before returning.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, warn};

use super::error::{DownloadError, panic_message};
use crate::plugins::{PluginError, Task, TaskGenerator};
use crate::reporter::{Reporter, RunContext};

type Advanced = (TaskGenerator, Option<Result<Task, PluginError>>);

pub(crate) struct Scheduler {
    ctx: Arc<RunContext>,
    max_workers: usize,
}

impl Scheduler {
    pub(crate) fn new(ctx: Arc<RunContext>, max_workers: usize) -> Self {
        Self { ctx, max_workers }
    }

    /// Run every task the generator yields; returns the number spawned
    pub(crate) async fn run(self, generator: TaskGenerator) -> Result<usize, DownloadError> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let (err_tx, mut err_rx) = mpsc::channel(self.max_workers);
        let cancel = self.ctx.cancel_token().clone();
        let mut workers = Workers::new();
        let mut generator = generator;
        let mut spawned = 0usize;

        let spawning: Result<(), DownloadError> = loop {
            if cancel.is_cancelled() {
                break Err(DownloadError::Cancelled);
            }

            let (returned, next) = match advance(generator).await {
                Ok(advanced) => advanced,
                Err(e) => break Err(DownloadError::Plugin(e)),
            };
            generator = returned;

            let task = match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(DownloadError::Plugin(e)),
                Some(Ok(task)) => task,
            };

            // Wait for a free slot unless a worker has already failed.
            let permit = tokio::select! {
                biased;
                Some(err) = err_rx.recv() => break Err(err),
                _ = cancel.cancelled() => break Err(DownloadError::Cancelled),
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Err(DownloadError::SpawnerPanicked(
                        "worker semaphore closed".to_string(),
                    )),
                },
            };

            while let Some(joined) = workers.try_join_next() {
                self.route(joined, &err_tx);
            }
            // A permit is released just before its task is marked finished.
            while workers.len() >= self.max_workers {
                match workers.join_next().await {
                    Some(joined) => self.route(joined, &err_tx),
                    None => break,
                }
            }

            let slot = spawned;
            spawned += 1;
            debug!(slot, "Spawning worker");
            self.ctx.metrics().task_spawned();
            workers.spawn(
                slot,
                run_worker(self.ctx.clone(), slot, task, permit, err_tx.clone()),
            );
            self.ctx.metrics().workers_in_flight(workers.len());
        };

        if !workers.is_empty() {
            debug!(in_flight = workers.len(), "Waiting for in-flight workers");
        }
        while let Some(joined) = workers.join_next().await {
            self.route(joined, &err_tx);
        }

        let outcome = match spawning {
            Err(DownloadError::Plugin(source)) if spawned == 0 => Err(DownloadError::NoTasks {
                source: Some(source),
            }),
            Err(err) => Err(err),
            Ok(()) => match err_rx.try_recv() {
                Ok(err) => Err(err),
                Err(_) if spawned == 0 => Err(DownloadError::NoTasks { source: None }),
                Err(_) => Ok(spawned),
            },
        };

        while err_rx.try_recv().is_ok() {
            self.ctx.metrics().error_discarded();
        }

        outcome
    }

    fn route(&self, joined: Result<(), DownloadError>, errors: &mpsc::Sender<DownloadError>) {
        if let Err(err) = joined {
            warn!(error = %err, "Worker task aborted");
            if errors.try_send(err).is_err() {
                self.ctx.metrics().error_discarded();
            }
        }
    }
}

/// Worker tasks of one run, keyed back to their slot
struct Workers {
    set: JoinSet<()>,
    slots: HashMap<Id, usize>,
}

impl Workers {
    fn new() -> Self {
        Self {
            set: JoinSet::new(),
            slots: HashMap::new(),
        }
    }

    fn spawn<F>(&mut self, slot: usize, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.set.spawn(worker);
        self.slots.insert(handle.id(), slot);
    }

    fn len(&self) -> usize {
        self.set.len()
    }

    fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn try_join_next(&mut self) -> Option<Result<(), DownloadError>> {
        let joined = self.set.try_join_next_with_id()?;
        Some(self.finish(joined))
    }

    async fn join_next(&mut self) -> Option<Result<(), DownloadError>> {
        let joined = self.set.join_next_with_id().await?;
        Some(self.finish(joined))
    }

    fn finish(&mut self, joined: Result<(Id, ()), JoinError>) -> Result<(), DownloadError> {
        match joined {
            Ok((id, ())) => {
                self.slots.remove(&id);
                Ok(())
            }
            Err(e) => {
                let slot = self.slots.remove(&e.id()).unwrap_or_default();
                Err(DownloadError::WorkerPanicked {
                    slot,
                    message: panic_message(e),
                })
            }
        }
    }
}

/// Pull the next item on the blocking pool; plugins may block in `next`
async fn advance(mut generator: TaskGenerator) -> Result<Advanced, PluginError> {
    tokio::task::spawn_blocking(move || {
        let next = generator.next();
        (generator, next)
    })
    .await
    .map_err(|e| PluginError::Panicked(panic_message(e)))
}

async fn run_worker(
    ctx: Arc<RunContext>,
    slot: usize,
    task: Task,
    permit: OwnedSemaphorePermit,
    errors: mpsc::Sender<DownloadError>,
) {
    // Released after the error (if any) is queued, so the spawner sees it
    // before it can acquire this slot again.
    let _permit = permit;

    let reporter = Reporter::new(ctx.clone(), slot);
    let outcome = match tokio::task::spawn_blocking(move || task(slot, &reporter)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(DownloadError::Task { slot, source }),
        Err(e) => Err(DownloadError::WorkerPanicked {
            slot,
            message: panic_message(e),
        }),
    };

    ctx.progress().worker_finished(slot);

    match outcome {
        Ok(()) => debug!(slot, "Worker finished"),
        Err(err) => {
            warn!(slot, error = %err, "Worker failed");
            ctx.metrics().task_failed();
            if errors.try_send(err).is_err() {
                debug!(slot, "Error channel full, discarding worker error");
                ctx.metrics().error_discarded();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::progress::Aggregator;
    use crate::observability::Metrics;
    use crate::plugins::{TaskError, Total};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn context(dir: &TempDir, max_workers: usize) -> (Arc<RunContext>, mpsc::Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel(max_workers);
        let ctx = Arc::new(RunContext::new(
            dir.path().to_path_buf(),
            dir.path().join(".tmp"),
            "test".to_string(),
            tx,
            Arc::new(Aggregator::new(Total::Unknown, max_workers)),
            Arc::new(Metrics::new()),
            CancellationToken::new(),
        ));
        (ctx, rx)
    }

    fn noop_tasks(count: usize) -> TaskGenerator {
        Box::new((0..count).map(|_| {
            let task: Task =
                Box::new(|_slot: usize, _reporter: &Reporter| -> Result<(), TaskError> { Ok(()) });
            Ok(task)
        }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_finished_workers_are_reaped_while_spawning() {
        let dir = TempDir::new().unwrap();
        let (ctx, _saved) = context(&dir, 2);

        let spawned = Scheduler::new(ctx.clone(), 2).run(noop_tasks(2000)).await.unwrap();

        assert_eq!(spawned, 2000);
        let metrics = ctx.metrics().snapshot();
        assert_eq!(metrics.tasks_spawned, 2000);
        assert!(metrics.peak_in_flight <= 2, "{}", metrics.peak_in_flight);
    }

    #[tokio::test]
    async fn test_aborted_wrapper_reports_its_slot() {
        let mut workers = Workers::new();
        workers.spawn(7, async {
            panic!("wrapper failed");
        });

        let joined = workers.join_next().await.unwrap();

        match joined {
            Err(DownloadError::WorkerPanicked { slot, message }) => {
                assert_eq!(slot, 7);
                assert!(message.contains("wrapper failed"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(workers.is_empty());
        assert!(workers.slots.is_empty());
    }
}
