use super::{MockObjectStore, ScriptedSession};
use s3swarm::manifest::{JobKey, JobStatus, JsonManifestStore, ManifestStore};
use s3swarm::progress::ProgressAggregator;
use s3swarm::session::SharedSession;
use s3swarm::swarm::{Swarm, SwarmOptions};
use s3swarm::transfer::{RetryPolicy, TransferExecutor, DEFAULT_LARGE_OBJECT_THRESHOLD};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Retry policy with millisecond backoffs.
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

pub fn test_options(worker_count: usize) -> SwarmOptions {
    SwarmOptions {
        worker_count,
        retry_failed: false,
        policy: fast_policy(3),
        large_object_threshold: DEFAULT_LARGE_OBJECT_THRESHOLD,
        queue_timeout: Duration::from_millis(200),
        shutdown_grace: Duration::from_secs(5),
        progress_interval: Duration::from_millis(10),
        dashboard: false,
    }
}

/// Manifest key of a remote object, laid out the way manifest generation
/// lays it out: folder is the first path segment, or the key itself for
/// top-level objects.
pub fn object_key(bucket: &str, key: &str) -> JobKey {
    let folder = key.split_once('/').map(|(folder, _)| folder).unwrap_or(key);
    let filename = key.rsplit('/').next().unwrap_or(key);
    JobKey::new(bucket, folder, filename)
}

/// Temporary destination, on-disk manifest and mock collaborators.
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub dest_root: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Arc<JsonManifestStore>,
    pub store: Arc<MockObjectStore>,
    pub session: Arc<ScriptedSession>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let dest_root = temp_dir.path().join("downloads");
        let manifest_path = temp_dir.path().join("download_manifest.json");
        let manifest = Arc::new(JsonManifestStore::load_or_create(&manifest_path).unwrap());
        Self {
            temp_dir,
            dest_root,
            manifest_path,
            manifest,
            store: Arc::new(MockObjectStore::new()),
            session: Arc::new(ScriptedSession::valid()),
        }
    }

    /// Put an object in the store and a matching Pending job in the manifest.
    pub fn add_object(&self, bucket: &str, key: &str, size: usize) -> JobKey {
        self.store.put_object(bucket, key, size);
        let job_key = object_key(bucket, key);
        self.manifest
            .add_item(job_key.clone(), size as u64, key)
            .unwrap();
        job_key
    }

    pub fn status(&self, key: &JobKey) -> JobStatus {
        self.manifest.get(key).unwrap().status
    }

    pub fn shared_session(&self) -> Arc<SharedSession> {
        Arc::new(SharedSession::new(self.session.clone()))
    }

    pub fn executor(&self, aggregator: Arc<ProgressAggregator>, policy: RetryPolicy) -> TransferExecutor {
        TransferExecutor::new(
            self.store.clone(),
            self.manifest.clone(),
            self.shared_session(),
            aggregator,
            policy,
            self.dest_root.clone(),
        )
    }

    pub fn swarm(&self, options: SwarmOptions) -> Swarm {
        Swarm::new(
            self.store.clone(),
            self.manifest.clone(),
            self.shared_session(),
            self.dest_root.clone(),
            options,
        )
    }

    /// Load the manifest file again, as a later run would.
    pub fn reload_manifest(&self) -> JsonManifestStore {
        JsonManifestStore::load_or_create(&self.manifest_path).unwrap()
    }
}

/// Every file below `dir` whose name ends with `suffix`.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(files_with_suffix(&path, suffix));
        } else if path.to_string_lossy().ends_with(suffix) {
            found.push(path);
        }
    }
    found
}
