//! Worker pool draining the shared job queue.

use super::queue::JobQueue;
use crate::manifest::{JobKey, JobStatus, ManifestStore};
use crate::progress::ProgressAggregator;
use crate::session::SharedSession;
use crate::transfer::{JobOutcome, TransferExecutor};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one worker did during its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
    /// Bytes transferred by completed jobs
    pub bytes: u64,
    /// The worker stopped because the session could not be validated
    pub session_lost: bool,
}

impl WorkerReport {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed { bytes } => {
                self.completed += 1;
                self.bytes += bytes;
            }
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::Deferred => self.deferred += 1,
        }
    }
}

/// Fixed-size pool of long-lived workers.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    worker_count: usize,
}

struct PoolShared {
    queue: Arc<JobQueue>,
    executor: Arc<TransferExecutor>,
    session: Arc<SharedSession>,
    manifest: Arc<dyn ManifestStore>,
    aggregator: Arc<ProgressAggregator>,
    queue_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        queue: Arc<JobQueue>,
        executor: Arc<TransferExecutor>,
        session: Arc<SharedSession>,
        manifest: Arc<dyn ManifestStore>,
        aggregator: Arc<ProgressAggregator>,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue,
                executor,
                session,
                manifest,
                aggregator,
                queue_timeout,
            }),
            worker_count,
        }
    }

    /// Spawn every worker. Each exits when the queue stays empty for the
    /// queue timeout, when the session is lost, or when `cancel` fires.
    pub fn spawn(&self, cancel: &CancellationToken) -> Vec<JoinHandle<WorkerReport>> {
        (0..self.worker_count)
            .map(|id| {
                let shared = self.shared.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { run_worker(id, shared, cancel).await })
            })
            .collect()
    }
}

async fn run_worker(id: usize, shared: Arc<PoolShared>, cancel: CancellationToken) -> WorkerReport {
    let mut report = WorkerReport {
        worker: id,
        ..Default::default()
    };
    debug!("Worker {} started", id);

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Worker {} stopping, run cancelled", id);
                break;
            }
            job = shared.queue.pop(shared.queue_timeout) => job,
        };
        let Some(job) = job else {
            debug!("Worker {} found no more work", id);
            break;
        };

        if !shared.session.ensure_valid().await {
            error!(
                "Worker {} could not validate the session, returning {} to the queue",
                id,
                job.key()
            );
            shared.queue.requeue(job);
            report.session_lost = true;
            break;
        }

        let key = job.key();
        let result = AssertUnwindSafe(shared.executor.execute(id, job, &cancel))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => report.record(&outcome),
            Ok(Err(e)) => {
                error!("Worker {} error processing {}: {:#}", id, key, e);
                record_failure(&shared, id, &key, &format!("{:#}", e));
                report.failed += 1;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Worker {} panicked processing {}: {}", id, key, message);
                record_failure(&shared, id, &key, &format!("Worker panicked: {}", message));
                report.failed += 1;
            }
        }
    }

    shared.aggregator.worker_idle(id);
    info!(
        "Worker {} finished: {} completed, {} failed, {} skipped",
        id, report.completed, report.failed, report.skipped
    );
    report
}

/// Best-effort Failed marker after an unexpected error.
fn record_failure(shared: &PoolShared, worker: usize, key: &JobKey, message: &str) {
    let status = shared.manifest.get(key).map(|job| job.status);
    match status {
        Some(JobStatus::Pending) | Some(JobStatus::Started) | Some(JobStatus::Failed) => {
            if let Err(e) = shared
                .manifest
                .update_status(key, JobStatus::Failed, Some(message))
            {
                warn!("Could not record failure for {}: {:#}", key, e);
            }
        }
        Some(JobStatus::Completed) | None => {}
    }
    shared.aggregator.job_failed(worker, message);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
