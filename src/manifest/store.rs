//! Manifest storage and persistence.
//!
//! Provides a JSON-file-backed ledger of every known transfer job. The ledger
//! is rewritten (write-then-rename) after every mutation while the store lock
//! is held, so a crash leaves it consistent with the last completed mutation.

use super::models::*;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

/// Trait for manifest storage operations.
///
/// Every mutation and every multi-record read is serialized by the
/// implementation; callers never hold references into its internals.
pub trait ManifestStore: Send + Sync {
    /// Add a job, or return the existing one unchanged if its identity
    /// (bucket, folder, filename) is already known.
    fn add_item(&self, key: JobKey, size: u64, file_path: &str) -> Result<Job>;

    /// Set a job's status and timestamp. Clears any stored error unless a
    /// new one is supplied. This is the only mutation path after creation.
    fn update_status(&self, key: &JobKey, status: JobStatus, error: Option<&str>) -> Result<Job>;

    /// Jobs with status Pending, plus Failed when `include_failed` is set.
    fn pending_items(&self, include_failed: bool) -> Vec<Job>;

    /// Jobs with status Failed, in ledger order.
    fn failed_items(&self) -> Vec<Job>;

    /// Get a job by identity.
    fn get(&self, key: &JobKey) -> Option<Job>;

    /// Current ledger statistics.
    fn stats(&self) -> ManifestStats;
}

/// On-disk layout: one root holding one child object per job.
#[derive(Serialize)]
struct ManifestFileRef<'a> {
    downloads: &'a [Job],
}

#[derive(Deserialize, Default)]
struct ManifestFile {
    #[serde(default)]
    downloads: Vec<Job>,
}

#[derive(Default)]
struct ManifestState {
    jobs: Vec<Job>,
    index: HashMap<JobKey, usize>,
    /// Running counters, updated on every add and transition.
    stats: ManifestStats,
}

impl ManifestState {
    fn from_jobs(jobs: Vec<Job>) -> Self {
        let mut state = ManifestState::default();
        for job in jobs {
            let key = job.key();
            if state.index.contains_key(&key) {
                warn!("Dropping duplicate manifest entry for {}", key);
                continue;
            }
            state.push(job);
        }
        state
    }

    fn push(&mut self, job: Job) {
        self.stats.counts.increment(job.status);
        self.stats.total_bytes += job.size;
        if job.status == JobStatus::Completed {
            self.stats.completed_bytes += job.size;
        }
        self.index.insert(job.key(), self.jobs.len());
        self.jobs.push(job);
    }

    fn set_status(&mut self, idx: usize, status: JobStatus, error: Option<&str>) {
        let job = &mut self.jobs[idx];
        let old = job.status;

        self.stats.counts.decrement(old);
        self.stats.counts.increment(status);
        if old == JobStatus::Completed {
            self.stats.completed_bytes = self.stats.completed_bytes.saturating_sub(job.size);
        }
        if status == JobStatus::Completed {
            self.stats.completed_bytes += job.size;
        }

        job.status = status;
        job.last_updated = Some(Utc::now());
        job.error = error.filter(|e| !e.is_empty()).map(str::to_string);
    }

    /// Reset jobs left Started by an interrupted run back to Pending.
    fn recover_interrupted(&mut self) -> usize {
        let stale: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status == JobStatus::Started)
            .map(|(idx, _)| idx)
            .collect();
        for &idx in &stale {
            self.set_status(idx, JobStatus::Pending, None);
        }
        stale.len()
    }
}

/// JSON-file-backed manifest store.
pub struct JsonManifestStore {
    /// `None` for in-memory stores (tests, dry runs).
    path: Option<PathBuf>,
    state: Mutex<ManifestState>,
}

impl JsonManifestStore {
    /// Load an existing manifest or create an empty one.
    ///
    /// A corrupt or unparsable ledger is discarded and replaced with an empty
    /// one. Jobs left Started by a previous run are reset to Pending.
    /// Only an unreadable file (other than missing) is an error.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let jobs = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ManifestFile>(&content) {
                Ok(file) => {
                    info!(
                        "Loaded existing manifest {:?} with {} items",
                        path,
                        file.downloads.len()
                    );
                    file.downloads
                }
                Err(e) => {
                    warn!(
                        "Corrupt manifest {:?} ({}), discarding it and starting empty",
                        path, e
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Created new manifest at {:?}", path);
                Vec::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read manifest {:?}", path));
            }
        };

        let mut state = ManifestState::from_jobs(jobs);
        let recovered = state.recover_interrupted();
        if recovered > 0 {
            info!(
                "Reset {} interrupted job(s) from a previous run back to pending",
                recovered
            );
        }

        let store = Self {
            path: Some(path),
            state: Mutex::new(state),
        };
        if recovered > 0 {
            let state = store.lock();
            store.persist(&state)?;
        }
        Ok(store)
    }

    /// Create a store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(ManifestState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full-scan statistics, for checking the running counters.
    pub fn scan_stats(&self) -> ManifestStats {
        ManifestStats::scan(self.lock().jobs.iter())
    }

    fn lock(&self) -> MutexGuard<'_, ManifestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flush the ledger. Must be called with the state lock held.
    fn persist(&self, state: &ManifestState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(&ManifestFileRef {
            downloads: &state.jobs,
        })
        .context("Failed to serialize manifest")?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        blocking_io(|| -> Result<()> {
            let mut tmp = NamedTempFile::new_in(dir)
                .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
            tmp.write_all(&json)
                .context("Failed to write manifest")?;
            tmp.as_file()
                .sync_all()
                .context("Failed to sync manifest")?;
            tmp.persist(path)
                .with_context(|| format!("Failed to replace manifest {:?}", path))?;
            Ok(())
        })?;

        debug!("Manifest flushed ({} items)", state.jobs.len());
        Ok(())
    }
}

/// Run blocking file IO. On a multi-threaded runtime the current worker
/// thread hands its other tasks off first.
fn blocking_io<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl ManifestStore for JsonManifestStore {
    fn add_item(&self, key: JobKey, size: u64, file_path: &str) -> Result<Job> {
        let mut state = self.lock();
        if let Some(&idx) = state.index.get(&key) {
            return Ok(state.jobs[idx].clone());
        }

        let job = Job::new(key, size, file_path);
        state.push(job.clone());
        self.persist(&state)?;
        Ok(job)
    }

    fn update_status(&self, key: &JobKey, status: JobStatus, error: Option<&str>) -> Result<Job> {
        let mut state = self.lock();
        let idx = *state
            .index
            .get(key)
            .ok_or_else(|| anyhow!("Job {} is not in the manifest", key))?;

        let current = state.jobs[idx].status;
        if !current.can_transition_to(status) {
            debug_assert!(
                false,
                "illegal job transition {} -> {} for {}",
                current, status, key
            );
            error!(
                "Illegal job transition {} -> {} for {}",
                current, status, key
            );
        }

        state.set_status(idx, status, error);
        self.persist(&state)?;
        Ok(state.jobs[idx].clone())
    }

    fn pending_items(&self, include_failed: bool) -> Vec<Job> {
        self.lock()
            .jobs
            .iter()
            .filter(|job| match job.status {
                JobStatus::Pending => true,
                JobStatus::Failed => include_failed,
                JobStatus::Started | JobStatus::Completed => false,
            })
            .cloned()
            .collect()
    }

    fn failed_items(&self) -> Vec<Job> {
        self.lock()
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Failed)
            .cloned()
            .collect()
    }

    fn get(&self, key: &JobKey) -> Option<Job> {
        let state = self.lock();
        state.index.get(key).map(|&idx| state.jobs[idx].clone())
    }

    fn stats(&self) -> ManifestStats {
        self.lock().stats
    }
}
