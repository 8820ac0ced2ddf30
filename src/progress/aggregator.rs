//! Progress aggregation across concurrent workers.
//!
//! All state lives behind one mutex and every operation is O(1) (snapshots
//! are O(workers)). Callers never get references into the state, only
//! copies via [`ProgressAggregator::snapshot`].

use crate::format::format_duration;
use crate::manifest::{Job, JobKey, JobStatus, ManifestStats};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

/// What a worker slot is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Downloading,
    Retrying,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Downloading => "downloading",
            WorkerStatus::Retrying => "retrying",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, WorkerStatus::Downloading | WorkerStatus::Retrying)
    }
}

/// Per-worker record.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub id: usize,
    pub status: WorkerStatus,
    pub current_job: Option<JobKey>,
    pub file_size: u64,
    /// Bytes reported by the current attempt
    pub bytes_transferred: u64,
    /// Start of the current attempt
    pub started_at: Option<Instant>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
}

impl WorkerState {
    fn new(id: usize) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            current_job: None,
            file_size: 0,
            bytes_transferred: 0,
            started_at: None,
            retry_count: 0,
            last_error: None,
            jobs_completed: 0,
            jobs_failed: 0,
        }
    }

    /// Instantaneous speed of the current attempt, bytes per second.
    pub fn speed(&self) -> f64 {
        match self.started_at {
            Some(started) if self.bytes_transferred > 0 => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.bytes_transferred as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Clear the current-job fields, keeping the lifetime counters.
    fn finish(&mut self, status: WorkerStatus) {
        self.status = status;
        self.current_job = None;
        self.file_size = 0;
        self.bytes_transferred = 0;
        self.started_at = None;
    }
}

/// Run-wide aggregate. A cache over manifest and worker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverallStats {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub total_bytes: u64,
    /// Completed bytes plus in-flight bytes of running attempts
    pub downloaded_bytes: u64,
    pub active_workers: usize,
    pub total_retries: u64,
}

/// Estimated time to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    Complete,
    Remaining(Duration),
    Unknown,
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Complete => f.write_str("Complete"),
            Eta::Remaining(remaining) => f.write_str(&format_duration(*remaining)),
            Eta::Unknown => f.write_str("Calculating..."),
        }
    }
}

/// Point-in-time copy of the aggregate state.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub workers: Vec<WorkerState>,
    pub overall: OverallStats,
    /// Optimistic overall speed, bytes per second
    pub speed: f64,
    pub eta: Eta,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub elapsed: Duration,
    /// Bytes downloaded since the run started
    pub session_bytes: u64,
}

impl ProgressSnapshot {
    pub fn percent_bytes(&self) -> f64 {
        if self.overall.total_bytes == 0 {
            return 100.0;
        }
        (self.overall.downloaded_bytes as f64 / self.overall.total_bytes as f64 * 100.0).min(100.0)
    }
}

struct Inner {
    workers: Vec<WorkerState>,
    overall: OverallStats,
    /// Downloaded bytes already on disk when the run started
    baseline_bytes: u64,
    started_at: Instant,
}

/// Thread-safe accumulator of worker progress.
pub struct ProgressAggregator {
    inner: Mutex<Inner>,
}

impl ProgressAggregator {
    pub fn new(worker_count: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                workers: (0..worker_count).map(WorkerState::new).collect(),
                overall: OverallStats::default(),
                baseline_bytes: 0,
                started_at: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the totals from the manifest and restart the clock.
    pub fn seed(&self, stats: &ManifestStats) {
        let mut inner = self.lock();
        inner.overall.total_jobs = stats.total_jobs();
        inner.overall.completed_jobs = stats.counts.completed;
        inner.overall.failed_jobs = stats.counts.failed;
        inner.overall.total_bytes = stats.total_bytes;
        inner.overall.downloaded_bytes = stats.completed_bytes;
        inner.baseline_bytes = stats.completed_bytes;
        inner.started_at = Instant::now();
    }

    /// Refresh job counts and totals from the manifest. Byte progress stays
    /// delta-driven.
    pub fn reconcile(&self, stats: &ManifestStats) {
        let mut inner = self.lock();
        inner.overall.total_jobs = stats.total_jobs();
        inner.overall.completed_jobs = stats.counts.completed;
        inner.overall.failed_jobs = stats.counts.failed;
        inner.overall.total_bytes = stats.total_bytes;
    }

    /// A worker picked up `job` and entered Started.
    pub fn worker_started(&self, worker: usize, job: &Job) {
        let mut inner = self.lock();
        let Inner {
            workers, overall, ..
        } = &mut *inner;
        let Some(state) = slot(workers, worker) else {
            return;
        };

        // A re-queued failure is no longer failed once it starts again.
        if job.status == JobStatus::Failed {
            overall.failed_jobs = overall.failed_jobs.saturating_sub(1);
        }
        if !state.status.is_active() {
            overall.active_workers += 1;
        }

        state.status = WorkerStatus::Downloading;
        state.current_job = Some(job.key());
        state.file_size = job.size;
        state.bytes_transferred = 0;
        state.started_at = Some(Instant::now());
        state.retry_count = 0;
        state.last_error = None;
    }

    /// Record the cumulative byte count of the worker's current attempt.
    pub fn update_progress(&self, worker: usize, cumulative: u64) {
        let mut inner = self.lock();
        let Inner {
            workers, overall, ..
        } = &mut *inner;
        let Some(state) = slot(workers, worker) else {
            return;
        };
        if !state.status.is_active() || cumulative <= state.bytes_transferred {
            return;
        }

        overall.downloaded_bytes += cumulative - state.bytes_transferred;
        state.bytes_transferred = cumulative;
        state.status = WorkerStatus::Downloading;
    }

    /// The current attempt failed and another one will follow. Bytes it
    /// reported are rolled back so the next attempt does not double count.
    pub fn worker_retrying(&self, worker: usize, error: &str) {
        let mut inner = self.lock();
        let Inner {
            workers, overall, ..
        } = &mut *inner;
        let Some(state) = slot(workers, worker) else {
            return;
        };

        overall.downloaded_bytes = overall
            .downloaded_bytes
            .saturating_sub(state.bytes_transferred);
        overall.total_retries += 1;

        state.status = WorkerStatus::Retrying;
        state.bytes_transferred = 0;
        state.started_at = Some(Instant::now());
        state.retry_count += 1;
        state.last_error = Some(error.to_string());
    }

    /// The worker's job completed with `final_size` bytes. In-flight bytes
    /// already counted are replaced by the authoritative size.
    pub fn job_completed(&self, worker: usize, final_size: u64) {
        let mut inner = self.lock();
        let Inner {
            workers, overall, ..
        } = &mut *inner;
        let Some(state) = slot(workers, worker) else {
            return;
        };

        overall.downloaded_bytes = overall
            .downloaded_bytes
            .saturating_sub(state.bytes_transferred)
            + final_size;
        overall.completed_jobs += 1;
        if state.status.is_active() {
            overall.active_workers = overall.active_workers.saturating_sub(1);
        }

        state.jobs_completed += 1;
        state.last_error = None;
        state.finish(WorkerStatus::Completed);
    }

    /// The worker's started job failed for good.
    pub fn job_failed(&self, worker: usize, error: &str) {
        let mut inner = self.lock();
        let Inner {
            workers, overall, ..
        } = &mut *inner;
        let Some(state) = slot(workers, worker) else {
            return;
        };

        overall.downloaded_bytes = overall
            .downloaded_bytes
            .saturating_sub(state.bytes_transferred);
        overall.failed_jobs += 1;
        if state.status.is_active() {
            overall.active_workers = overall.active_workers.saturating_sub(1);
        }

        state.jobs_failed += 1;
        state.last_error = Some(error.to_string());
        state.finish(WorkerStatus::Failed);
    }

    /// `job` was rejected before it ever started.
    pub fn job_rejected(&self, worker: usize, job: &Job, error: &str) {
        let mut inner = self.lock();
        let Inner {
            workers, overall, ..
        } = &mut *inner;
        let Some(state) = slot(workers, worker) else {
            return;
        };

        if job.status != JobStatus::Failed {
            overall.failed_jobs += 1;
        }
        state.jobs_failed += 1;
        state.last_error = Some(error.to_string());
        state.finish(WorkerStatus::Failed);
    }

    /// The worker gave its job back (lock contention, cancellation) or has
    /// nothing to do.
    pub fn worker_idle(&self, worker: usize) {
        let mut inner = self.lock();
        let Inner {
            workers, overall, ..
        } = &mut *inner;
        let Some(state) = slot(workers, worker) else {
            return;
        };

        if state.status.is_active() {
            overall.downloaded_bytes = overall
                .downloaded_bytes
                .saturating_sub(state.bytes_transferred);
            overall.active_workers = overall.active_workers.saturating_sub(1);
        }
        state.finish(WorkerStatus::Idle);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.lock();
        let elapsed = inner.started_at.elapsed();
        let session_bytes = inner
            .overall
            .downloaded_bytes
            .saturating_sub(inner.baseline_bytes);

        let average = if elapsed.as_secs_f64() > 0.0 {
            session_bytes as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let instantaneous: f64 = inner
            .workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Downloading)
            .map(WorkerState::speed)
            .sum();
        let speed = average.max(instantaneous);

        let overall = inner.overall;
        let eta = if overall.downloaded_bytes >= overall.total_bytes {
            Eta::Complete
        } else if speed > 0.0 {
            let remaining = (overall.total_bytes - overall.downloaded_bytes) as f64;
            Eta::Remaining(Duration::from_secs_f64(remaining / speed))
        } else {
            Eta::Unknown
        };
        let estimated_completion = match eta {
            Eta::Remaining(remaining) => chrono::Duration::from_std(remaining)
                .ok()
                .map(|remaining| Utc::now() + remaining),
            Eta::Complete | Eta::Unknown => None,
        };

        ProgressSnapshot {
            workers: inner.workers.clone(),
            overall,
            speed,
            eta,
            estimated_completion,
            elapsed,
            session_bytes,
        }
    }
}

fn slot(workers: &mut [WorkerState], worker: usize) -> Option<&mut WorkerState> {
    let state = workers.get_mut(worker);
    if state.is_none() {
        warn!("Progress update for unknown worker {}", worker);
    }
    state
}
