//! Progress and result aggregation for a single run

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::humanize::ByteSize;
use crate::plugins::Total;

/// Byte reports per throughput sample, per allowed worker
const REPORTS_PER_SAMPLE_PER_WORKER: usize = 8;
const MAX_SAMPLES: usize = 16;

#[derive(Debug)]
struct WorkerProgress {
    bytes: u64,
    started: Instant,
}

#[derive(Debug)]
struct ProgressState {
    total: Total,
    paths: Vec<PathBuf>,
    bytes: u64,
    reports: usize,
    workers: BTreeMap<usize, WorkerProgress>,
    samples: VecDeque<(Instant, u64)>,
    started: Instant,
}

/// Shared view of completed artifacts and byte-level progress
///
/// Fed by pipeline observers (bytes, per worker slot) and by the collector
/// (completed paths). Every method takes the same lock, so snapshots are
/// consistent with concurrent updates.
#[derive(Debug)]
pub struct Aggregator {
    state: Mutex<ProgressState>,
    reports_per_sample: usize,
}

impl Aggregator {
    pub fn new(total: Total, max_workers: usize) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(ProgressState {
                total,
                paths: Vec::with_capacity(100),
                bytes: 0,
                reports: 0,
                workers: BTreeMap::new(),
                samples: VecDeque::with_capacity(MAX_SAMPLES),
                started: now,
            }),
            reports_per_sample: REPORTS_PER_SAMPLE_PER_WORKER * max_workers.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attribute `len` written bytes to worker `slot`
    pub fn record_bytes(&self, slot: usize, len: usize) {
        let now = Instant::now();
        let mut state = self.state();

        state
            .workers
            .entry(slot)
            .or_insert_with(|| WorkerProgress {
                bytes: 0,
                started: now,
            })
            .bytes += len as u64;
        state.bytes += len as u64;
        state.reports += 1;

        if state.reports % self.reports_per_sample == 0 {
            if state.samples.len() == MAX_SAMPLES {
                state.samples.pop_front();
            }
            let bytes = state.bytes;
            state.samples.push_back((now, bytes));
        }
    }

    /// Stop attributing throughput to `slot`
    pub fn worker_finished(&self, slot: usize) {
        self.state().workers.remove(&slot);
    }

    /// Append a finalized artifact; the list only ever grows
    pub fn record_completed(&self, path: PathBuf) {
        self.state().paths.push(path);
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.state().paths.clone()
    }

    pub fn completed(&self) -> usize {
        self.state().paths.len()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = Instant::now();
        let state = self.state();

        let bytes_per_sec = match (state.samples.front(), state.samples.back()) {
            (Some(&(first_at, first)), Some(&(last_at, last))) if last_at > first_at => {
                rate(last - first, last_at.duration_since(first_at).as_secs_f64())
            }
            _ => rate(state.bytes, now.duration_since(state.started).as_secs_f64()),
        };

        let workers = state
            .workers
            .iter()
            .map(|(&slot, worker)| WorkerSnapshot {
                slot,
                bytes: worker.bytes,
                bytes_per_sec: rate(
                    worker.bytes,
                    now.duration_since(worker.started).as_secs_f64(),
                ),
            })
            .collect();

        ProgressSnapshot {
            completed: state.paths.len(),
            total: state.total,
            bytes: state.bytes,
            bytes_per_sec,
            workers,
            last: state
                .paths
                .last()
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned()),
        }
    }
}

fn rate(bytes: u64, secs: f64) -> u64 {
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

/// Per-worker throughput
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub slot: usize,
    pub bytes: u64,
    pub bytes_per_sec: u64,
}

/// Point-in-time progress view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: Total,
    pub bytes: u64,
    pub bytes_per_sec: u64,
    pub workers: Vec<WorkerSnapshot>,
    /// File name of the most recently completed artifact
    pub last: Option<String>,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        matches!(self.total, Total::Known(total) if self.completed >= total)
    }
}

fn unit(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Total::Known(total) => {
                let percent = if total == 0 {
                    100
                } else {
                    self.completed * 100 / total
                };
                write!(
                    f,
                    "{} of {} {} ({}%)",
                    self.completed,
                    total,
                    unit(total),
                    percent
                )?;
            }
            Total::Unknown => write!(f, "{} {}", self.completed, unit(self.completed))?,
        }

        write!(
            f,
            " | {}/s | {} active",
            ByteSize(self.bytes_per_sec),
            self.workers.len()
        )?;

        if let Some(last) = &self.last {
            write!(f, " | Last: {}", last)?;
        }

        Ok(())
    }
}

/// Base name used in log lines for a completed artifact
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
