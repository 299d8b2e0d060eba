//! Run counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters accumulated across all runs of a download manager
#[derive(Debug, Default)]
pub struct Metrics {
    tasks_spawned: AtomicU64,
    tasks_failed: AtomicU64,
    errors_discarded: AtomicU64,
    files_saved: AtomicU64,
    bytes_written: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_spawned(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_failed", "Metric incremented");
    }

    /// A failure arrived after the first fatal error had already been queued
    pub fn error_discarded(&self) {
        self.errors_discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "errors_discarded", "Metric incremented");
    }

    pub fn file_saved(&self) {
        self.files_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, len: u64) {
        self.bytes_written.fetch_add(len, Ordering::Relaxed);
    }

    /// Number of worker tasks the scheduler is tracking after a spawn
    pub fn workers_in_flight(&self, count: usize) {
        self.peak_in_flight.fetch_max(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            errors_discarded: self.errors_discarded.load(Ordering::Relaxed),
            files_saved: self.files_saved.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_spawned: u64,
    pub tasks_failed: u64,
    pub errors_discarded: u64,
    pub files_saved: u64,
    pub bytes_written: u64,
    /// Most worker tasks held at once by any run
    pub peak_in_flight: u64,
}
