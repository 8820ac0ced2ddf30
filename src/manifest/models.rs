//! Data models for the download manifest.
//!
//! Defines jobs, their lifecycle status, identity keys and ledger statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Started,
    Completed, // terminal for this enqueue
    Failed,    // terminal for this enqueue, re-enqueueable
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Started => "started",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the ledger accepts a transition from `self` to `next`.
    ///
    /// `Pending/Failed -> Failed` is the invalid-entry rejection that never
    /// enters Started, `Started -> Pending` is interruption recovery.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Failed, Started)
                | (Started, Completed)
                | (Started, Failed)
                | (Pending, Failed)
                | (Failed, Failed)
                | (Started, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a job: unique within the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub bucket: String,
    pub folder: String,
    pub filename: String,
}

impl JobKey {
    pub fn new(
        bucket: impl Into<String>,
        folder: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            folder: folder.into(),
            filename: filename.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.bucket, self.folder, self.filename)
    }
}

/// One transferable object tracked by the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub bucket: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub filename: String,
    /// Size in bytes as reported at enumeration time
    #[serde(default)]
    pub size: u64,
    pub status: JobStatus,
    /// Full remote key, empty when the object sits directly under `folder`
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "Utc::now")]
    pub added: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(key: JobKey, size: u64, file_path: impl Into<String>) -> Self {
        Self {
            bucket: key.bucket,
            folder: key.folder,
            filename: key.filename,
            size,
            status: JobStatus::Pending,
            file_path: file_path.into(),
            added: Utc::now(),
            last_updated: None,
            error: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.bucket, &self.folder, &self.filename)
    }

    /// Returns true if the filename is empty or whitespace only.
    pub fn has_blank_filename(&self) -> bool {
        self.filename.trim().is_empty()
    }
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Started => self.started,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }

    fn slot(&mut self, status: JobStatus) -> &mut usize {
        match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Started => &mut self.started,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
        }
    }

    pub(crate) fn increment(&mut self, status: JobStatus) {
        *self.slot(status) += 1;
    }

    pub(crate) fn decrement(&mut self, status: JobStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    pub fn total(&self) -> usize {
        self.pending + self.started + self.completed + self.failed
    }
}

/// Ledger-wide statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestStats {
    pub counts: StatusCounts,
    pub total_bytes: u64,
    pub completed_bytes: u64,
}

impl ManifestStats {
    pub fn total_jobs(&self) -> usize {
        self.counts.total()
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.completed_bytes)
    }

    /// Recompute statistics with a full scan over `jobs`.
    pub fn scan<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = ManifestStats::default();
        for job in jobs {
            stats.counts.increment(job.status);
            stats.total_bytes += job.size;
            if job.status == JobStatus::Completed {
                stats.completed_bytes += job.size;
            }
        }
        stats
    }
}
