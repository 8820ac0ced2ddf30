use async_trait::async_trait;
use s3swarm::object_store::{ObjectStore, ProgressFn, RemoteEntry, RemoteObject};
use s3swarm::transfer::{ErrorKind, TransferError};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const CHUNK_SIZE: usize = 64 * 1024;

/// In-memory object store with scripted per-key failures.
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    failures: Mutex<HashMap<String, VecDeque<TransferError>>>,
    panics: Mutex<BTreeSet<String>>,
    denied_buckets: Mutex<BTreeSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object of `size` bytes with deterministic content.
    pub fn put_object(&self, bucket: &str, key: &str, size: usize) {
        let content = (0..size).map(|i| (i % 251) as u8).collect();
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), content);
    }

    /// Make the next download of `key` fail with `error`. Queued failures
    /// are consumed one per attempt.
    pub fn fail_next(&self, key: &str, error: TransferError) {
        self.failures
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make the next download of `key` panic mid-transfer.
    pub fn panic_next(&self, key: &str) {
        self.panics.lock().unwrap().insert(key.to_string());
    }

    pub fn deny_bucket(&self, bucket: &str) {
        self.denied_buckets.lock().unwrap().insert(bucket.to_string());
    }

    /// Hold every download for `delay` before transferring.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn download_calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_download_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of simultaneous downloads of `key` observed.
    pub fn max_concurrent_downloads(&self, key: &str) -> usize {
        self.max_in_flight
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, key: &str) {
        *self.calls.lock().unwrap().entry(key.to_string()).or_default() += 1;
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(key.to_string()).or_default();
        *count += 1;
        let mut max = self.max_in_flight.lock().unwrap();
        let peak = max.entry(key.to_string()).or_default();
        *peak = (*peak).max(*count);
    }

    fn leave(&self, key: &str) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(key) {
            *count -= 1;
        }
    }

    fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    async fn transfer(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, TransferError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let content = self.object(bucket, key).ok_or_else(|| {
            TransferError::new(ErrorKind::NotFound, format!("NoSuchKey: {}", key))
        })?;

        let panics = self.panics.lock().unwrap().remove(key);
        if panics {
            on_progress(content.len() as u64 / 2);
            panic!("boom");
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = failure {
            // Fail halfway through, after reporting some progress.
            on_progress(content.len() as u64 / 2);
            return Err(error);
        }

        let mut written = 0u64;
        for chunk in content.chunks(CHUNK_SIZE) {
            written += chunk.len() as u64;
            on_progress(written);
        }
        tokio::fs::write(dest, &content).await?;
        Ok(written)
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn check_access(&self, bucket: &str) -> Result<(), TransferError> {
        if self.denied_buckets.lock().unwrap().contains(bucket) {
            return Err(TransferError::new(ErrorKind::Auth, "AccessDenied"));
        }
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let objects = self.objects.lock().unwrap();
        let mut folders = BTreeSet::new();
        let mut entries = Vec::new();
        for (b, key) in objects.keys() {
            if b != bucket {
                continue;
            }
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(format!("{}{}", prefix, folder));
                }
                None => entries.push(RemoteEntry {
                    name: key.clone(),
                    is_folder: false,
                }),
            }
        }
        entries.extend(folders.into_iter().map(|name| RemoteEntry {
            name,
            is_folder: true,
        }));
        Ok(entries)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<RemoteObject>, TransferError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), content)| RemoteObject {
                key: key.clone(),
                size: content.len() as u64,
            })
            .collect())
    }

    async fn head_size(&self, bucket: &str, key: &str) -> Result<Option<u64>, TransferError> {
        Ok(self.object(bucket, key).map(|content| content.len() as u64))
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, TransferError> {
        self.enter(key);
        let result = self.transfer(bucket, key, dest, on_progress).await;
        self.leave(key);
        result
    }
}
