//! Per-job transfer execution.
//!
//! One call to [`TransferExecutor::execute`] runs a job's whole attempt
//! sequence: validate, lock, enter Started, attempt with backoff, record the
//! terminal state, unlock. The lock is held by a
//! [`LockHandle`](crate::lock_guard::LockHandle), so it is
//! released on every exit path, panics included.

use super::paths::{resolve_target, TransferTarget};
use super::retry_policy::RetryPolicy;
use crate::lock_guard;
use crate::manifest::{Job, JobKey, JobStatus, ManifestStore};
use crate::object_store::ObjectStore;
use crate::progress::{ProgressAggregator, ProgressThrottle};
use crate::session::SharedSession;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const INVALID_ENTRY_ERROR: &str = "Invalid entry - empty filename";
pub const CREDENTIAL_ERROR: &str = "Credential validation failed";

/// Objects above this size get their session re-confirmed before transfer.
pub const DEFAULT_LARGE_OBJECT_THRESHOLD: u64 = 100 * 1024 * 1024;

/// How one job's execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Transferred, the job is Completed.
    Completed { bytes: u64 },
    /// Recorded as Failed with `error`.
    Failed { error: String },
    /// Someone else holds the destination lock, the job stays Pending.
    Skipped,
    /// Cancelled between attempts, the job went back to Pending.
    Deferred,
}

/// Runs transfer jobs against an object store.
pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
    manifest: Arc<dyn ManifestStore>,
    session: Arc<SharedSession>,
    aggregator: Arc<ProgressAggregator>,
    policy: RetryPolicy,
    dest_root: PathBuf,
    large_object_threshold: u64,
}

impl TransferExecutor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        manifest: Arc<dyn ManifestStore>,
        session: Arc<SharedSession>,
        aggregator: Arc<ProgressAggregator>,
        policy: RetryPolicy,
        dest_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            manifest,
            session,
            aggregator,
            policy,
            dest_root: dest_root.into(),
            large_object_threshold: DEFAULT_LARGE_OBJECT_THRESHOLD,
        }
    }

    pub fn with_large_object_threshold(mut self, bytes: u64) -> Self {
        self.large_object_threshold = bytes;
        self
    }

    /// Run `job` on behalf of worker `worker`.
    ///
    /// Per-job failures are recorded in the manifest and reported as
    /// [`JobOutcome::Failed`]. `Err` means the manifest itself could not be
    /// updated.
    pub async fn execute(
        &self,
        worker: usize,
        job: Job,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome> {
        let key = job.key();

        if job.has_blank_filename() {
            warn!(
                "Skipping invalid entry with empty filename in {}/{}",
                job.bucket, job.folder
            );
            return self.reject(worker, &job, INVALID_ENTRY_ERROR.to_string());
        }

        let target = resolve_target(&self.dest_root, &job);
        if target.file_name.is_empty() {
            warn!("Skipping invalid entry with unusable filename {:?}", job.filename);
            return self.reject(worker, &job, INVALID_ENTRY_ERROR.to_string());
        }
        if let Err(e) = tokio::fs::create_dir_all(&target.dest_dir).await {
            error!("Error creating directory {:?}: {}", target.dest_dir, e);
            return self.reject(
                worker,
                &job,
                format!("Could not create directory {:?}: {}", target.dest_dir, e),
            );
        }

        let lock = match lock_guard::acquire(&target.dest_dir, &target.file_name) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                info!("Skipping {} - lock file exists", key);
                self.aggregator.worker_idle(worker);
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => {
                error!("Could not create lock file for {}: {}", key, e);
                return self.reject(worker, &job, format!("Could not create lock file: {}", e));
            }
        };

        let outcome = self.run_locked(worker, &job, &key, &target, cancel).await;
        lock.release();
        outcome
    }

    async fn run_locked(
        &self,
        worker: usize,
        job: &Job,
        key: &JobKey,
        target: &TransferTarget,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome> {
        self.manifest.update_status(key, JobStatus::Started, None)?;
        self.aggregator.worker_started(worker, job);
        info!(
            "Starting download: {} ({})",
            key,
            crate::format::format_size(job.size)
        );

        if job.size > self.large_object_threshold && !self.session.revalidate().await {
            error!(
                "Could not validate credentials for large file download: {}",
                key
            );
            return self.fail(worker, key, CREDENTIAL_ERROR.to_string());
        }

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let wait = self.policy.backoff(attempt - 1);
                info!(
                    "Retry {}/{} for {} in {:.1}s",
                    attempt,
                    self.policy.max_retries,
                    key,
                    wait.as_secs_f64()
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => {
                        info!("Cancelled while waiting to retry {}, leaving it pending", key);
                        self.manifest.update_status(key, JobStatus::Pending, None)?;
                        self.aggregator.worker_idle(worker);
                        return Ok(JobOutcome::Deferred);
                    }
                }
            }

            let throttle = ProgressThrottle::new(job.size);
            let aggregator = &self.aggregator;
            let on_progress = |cumulative: u64| {
                if throttle.should_emit(cumulative) {
                    aggregator.update_progress(worker, cumulative);
                }
            };

            let result = self
                .store
                .download(&job.bucket, &target.source_key, &target.dest_file, &on_progress)
                .await;

            match result {
                Ok(bytes) => {
                    self.manifest.update_status(key, JobStatus::Completed, None)?;
                    self.aggregator.job_completed(worker, bytes);
                    info!("Completed download: {} ({} bytes)", key, bytes);
                    return Ok(JobOutcome::Completed { bytes });
                }
                Err(err) if self.policy.should_retry(&err, attempt) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        self.policy.max_attempts(),
                        key,
                        err
                    );
                    self.aggregator.worker_retrying(worker, &err.to_string());
                    attempt += 1;
                }
                Err(err) => {
                    let message = if err.kind.is_retryable() {
                        format!("{} (gave up after {} attempts)", err, attempt + 1)
                    } else {
                        err.to_string()
                    };
                    error!("Download failed for {}: {}", key, message);
                    return self.fail(worker, key, message);
                }
            }
        }
    }

    /// Record a started job as Failed.
    fn fail(&self, worker: usize, key: &JobKey, error: String) -> Result<JobOutcome> {
        self.manifest
            .update_status(key, JobStatus::Failed, Some(&error))?;
        self.aggregator.job_failed(worker, &error);
        Ok(JobOutcome::Failed { error })
    }

    /// Record a job that never entered Started as Failed.
    fn reject(&self, worker: usize, job: &Job, error: String) -> Result<JobOutcome> {
        debug!("Rejecting {}: {}", job.key(), error);
        self.manifest
            .update_status(&job.key(), JobStatus::Failed, Some(&error))?;
        self.aggregator.job_rejected(worker, job, &error);
        Ok(JobOutcome::Failed { error })
    }
}
