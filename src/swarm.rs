//! Run orchestration.
//!
//! A [`Swarm`] wires one run together: it seeds the progress view and the job
//! queue from the manifest, starts the worker pool and the progress reporter,
//! and waits for the pool to drain or for the run to be cancelled.

use crate::config::TransferSettings;
use crate::manifest::ManifestStore;
use crate::object_store::ObjectStore;
use crate::pool::{JobQueue, WorkerPool, WorkerReport};
use crate::progress::{
    DashboardObserver, LogObserver, ProgressAggregator, ProgressObserver, ProgressReporter,
};
use crate::session::SharedSession;
use crate::transfer::{RetryPolicy, TransferExecutor};
use anyhow::{Context, Result};
use indicatif::MultiProgress;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const LOG_PROGRESS_EVERY: Duration = Duration::from_secs(10);

/// Knobs of a single run.
#[derive(Debug, Clone)]
pub struct SwarmOptions {
    pub worker_count: usize,
    /// Re-enqueue jobs that failed in earlier runs
    pub retry_failed: bool,
    pub policy: RetryPolicy,
    pub large_object_threshold: u64,
    pub queue_timeout: Duration,
    pub shutdown_grace: Duration,
    pub progress_interval: Duration,
    /// Render the terminal dashboard instead of periodic log lines
    pub dashboard: bool,
}

impl SwarmOptions {
    pub fn from_settings(settings: &TransferSettings, retry_failed: bool) -> Self {
        Self {
            worker_count: settings.max_workers,
            retry_failed,
            policy: RetryPolicy::new(settings),
            large_object_threshold: settings.large_object_threshold_bytes(),
            queue_timeout: settings.queue_timeout(),
            shutdown_grace: settings.shutdown_grace(),
            progress_interval: settings.progress_interval(),
            dashboard: settings.dashboard,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Jobs enqueued at the start of the run
    pub enqueued: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs still waiting for a future run
    pub pending: usize,
    /// Bytes transferred during this run
    pub bytes: u64,
    pub elapsed: Duration,
    pub retries: u64,
    pub interrupted: bool,
    /// Workers were still running when the shutdown grace period expired
    pub timed_out: bool,
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    /// Average transfer rate of this run, bytes per second.
    pub fn average_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }

    pub fn session_lost(&self) -> bool {
        self.workers.iter().any(|w| w.session_lost)
    }
}

/// One bulk transfer run over a manifest.
pub struct Swarm {
    store: Arc<dyn ObjectStore>,
    manifest: Arc<dyn ManifestStore>,
    session: Arc<SharedSession>,
    dest_root: PathBuf,
    options: SwarmOptions,
    multi: MultiProgress,
}

impl Swarm {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        manifest: Arc<dyn ManifestStore>,
        session: Arc<SharedSession>,
        dest_root: impl Into<PathBuf>,
        options: SwarmOptions,
    ) -> Self {
        Self {
            store,
            manifest,
            session,
            dest_root: dest_root.into(),
            options,
            multi: MultiProgress::new(),
        }
    }

    /// Draw the dashboard on `multi`, the same one the log writer suspends.
    pub fn with_multi_progress(mut self, multi: MultiProgress) -> Self {
        self.multi = multi;
        self
    }

    /// Transfer every pending job. Returns once the queue is drained, or
    /// after `cancel` fires and in-flight transfers settle.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        std::fs::create_dir_all(&self.dest_root)
            .with_context(|| format!("Failed to create destination {:?}", self.dest_root))?;

        let worker_count = self.options.worker_count.max(1);
        let aggregator = Arc::new(ProgressAggregator::new(worker_count));
        aggregator.seed(&self.manifest.stats());

        let jobs = self.manifest.pending_items(self.options.retry_failed);
        let enqueued = jobs.len();
        let queue = Arc::new(JobQueue::new());
        queue.extend(jobs);
        queue.close();
        info!(
            "Starting run: {} jobs, {} workers, destination {:?}",
            enqueued, worker_count, self.dest_root
        );

        let executor = Arc::new(
            TransferExecutor::new(
                self.store.clone(),
                self.manifest.clone(),
                self.session.clone(),
                aggregator.clone(),
                self.options.policy.clone(),
                self.dest_root.clone(),
            )
            .with_large_object_threshold(self.options.large_object_threshold),
        );
        let pool = WorkerPool::new(
            worker_count,
            queue.clone(),
            executor,
            self.session.clone(),
            self.manifest.clone(),
            aggregator.clone(),
            self.options.queue_timeout,
        );

        let observer: Box<dyn ProgressObserver> = if self.options.dashboard {
            Box::new(DashboardObserver::new(self.multi.clone(), worker_count))
        } else {
            Box::new(LogObserver::new(LOG_PROGRESS_EVERY))
        };
        let reporter = ProgressReporter::new(
            aggregator.clone(),
            self.manifest.clone(),
            self.options.progress_interval,
        )
        .with_observer(observer);
        let reporter_shutdown = CancellationToken::new();
        let reporter_handle = tokio::spawn(reporter.run(reporter_shutdown.clone()));

        let handles = pool.spawn(&cancel);
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let join = futures::future::join_all(handles);
        tokio::pin!(join);

        let finished = tokio::select! {
            results = &mut join => Some(results),
            _ = cancel.cancelled() => None,
        };
        let mut timed_out = false;
        let results = match finished {
            Some(results) => results,
            None => {
                warn!(
                    "Interrupted, waiting up to {}s for in-flight transfers",
                    self.options.shutdown_grace.as_secs()
                );
                match tokio::time::timeout(self.options.shutdown_grace, &mut join).await {
                    Ok(results) => results,
                    Err(_) => {
                        error!("Workers did not stop in time, aborting them");
                        timed_out = true;
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        join.await
                    }
                }
            }
        };

        let workers: Vec<WorkerReport> = results
            .into_iter()
            .enumerate()
            .map(|(id, result)| {
                result.unwrap_or_else(|e| {
                    if !e.is_cancelled() {
                        error!("Worker {} task failed: {}", id, e);
                    }
                    WorkerReport {
                        worker: id,
                        ..Default::default()
                    }
                })
            })
            .collect();
        if !queue.is_empty() {
            info!("{} queued jobs were not started and stay pending", queue.len());
        }

        reporter_shutdown.cancel();
        let snapshot = match reporter_handle.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Progress reporter task failed: {}", e);
                aggregator.snapshot()
            }
        };

        let stats = self.manifest.stats();
        let summary = RunSummary {
            enqueued,
            completed: workers.iter().map(|w| w.completed).sum(),
            failed: workers.iter().map(|w| w.failed).sum(),
            pending: stats.counts.pending + stats.counts.started,
            bytes: snapshot.session_bytes,
            elapsed: started.elapsed(),
            retries: snapshot.overall.total_retries,
            interrupted: cancel.is_cancelled(),
            timed_out,
            workers,
        };
        info!(
            "Run finished: {} completed, {} failed, {} pending, {} in {:.1}s",
            summary.completed,
            summary.failed,
            summary.pending,
            crate::format::format_size(summary.bytes),
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }
}

/// Cancel `cancel` on the first interrupt. A second interrupt exits the
/// process immediately.
pub fn install_interrupt_handler(cancel: CancellationToken) -> Result<()> {
    let interrupted = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            eprintln!("\nForced exit");
            std::process::exit(130);
        }
        eprintln!("\nInterrupt received, finishing in-flight transfers (Ctrl-C again to force)");
        cancel.cancel();
    })
    .context("Failed to install interrupt handler")
}
