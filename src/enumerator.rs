//! Manifest generation.
//!
//! Walks every configured bucket and adds one job per object to the
//! manifest. Top-level files become jobs directly; top-level folders are
//! expanded recursively.

use crate::manifest::{JobKey, ManifestStore};
use crate::object_store::{ObjectStore, RemoteEntry};
use crate::transfer::{ErrorKind, TransferError};
use anyhow::Result;
use tracing::{debug, error, info, warn};

/// Totals of one manifest generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub items: usize,
    pub total_bytes: u64,
    /// Buckets skipped because they could not be accessed or listed
    pub skipped_buckets: Vec<String>,
    /// Remote keys left out because another object already claimed the same
    /// bucket, folder and filename
    pub collisions: Vec<String>,
}

/// Counts of one bucket's entries.
#[derive(Debug, Default)]
struct BucketTally {
    items: usize,
    bytes: u64,
    collisions: Vec<String>,
}

impl BucketTally {
    fn add(
        &mut self,
        manifest: &dyn ManifestStore,
        key: JobKey,
        size: u64,
        file_path: &str,
    ) -> Result<()> {
        if let Some(existing) = manifest.get(&key) {
            if existing.file_path != file_path {
                warn!(
                    "Skipping {}/{}: {} is already tracked from {}",
                    key.bucket, file_path, key, existing.file_path
                );
                self.collisions.push(format!("{}/{}", key.bucket, file_path));
            }
            return Ok(());
        }
        manifest.add_item(key, size, file_path)?;
        self.items += 1;
        self.bytes += size;
        Ok(())
    }
}

/// Populate `manifest` with every object of `buckets`.
///
/// Buckets that cannot be accessed are logged and skipped. `Err` means the
/// manifest itself could not be written.
pub async fn generate_manifest(
    store: &dyn ObjectStore,
    manifest: &dyn ManifestStore,
    buckets: &[String],
) -> Result<GenerationReport> {
    let mut report = GenerationReport::default();

    for bucket in buckets {
        info!("Processing bucket: {}", bucket);

        if let Err(e) = store.check_access(bucket).await {
            error!("Cannot access bucket {}: {}", bucket, e);
            report.skipped_buckets.push(bucket.clone());
            continue;
        }

        let entries = match store.list(bucket, "").await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Error listing bucket {}: {}", bucket, e);
                report.skipped_buckets.push(bucket.clone());
                continue;
            }
        };

        let tally = add_bucket_entries(store, manifest, bucket, &entries).await?;
        info!("Bucket {}: {} new items", bucket, tally.items);
        report.items += tally.items;
        report.total_bytes += tally.bytes;
        report.collisions.extend(tally.collisions);
    }

    info!(
        "Manifest generation complete: {} items, {}",
        report.items,
        crate::format::format_size(report.total_bytes)
    );
    Ok(report)
}

async fn add_bucket_entries(
    store: &dyn ObjectStore,
    manifest: &dyn ManifestStore,
    bucket: &str,
    entries: &[RemoteEntry],
) -> Result<BucketTally> {
    let mut tally = BucketTally::default();

    for entry in entries {
        if entry.is_folder {
            let objects = match store.list_objects(bucket, &format!("{}/", entry.name)).await {
                Ok(objects) => objects,
                Err(e) => {
                    error!("Error listing folder {}/{}: {}", bucket, entry.name, e);
                    continue;
                }
            };
            for object in objects {
                if object.key.ends_with('/') {
                    continue;
                }
                let filename = basename(&object.key);
                if filename.trim().is_empty() {
                    debug!("Skipping entry with blank name: {}/{}", bucket, object.key);
                    continue;
                }
                let key = JobKey::new(bucket, &entry.name, filename);
                tally.add(manifest, key, object.size, &object.key)?;
            }
        } else {
            let size = match store.head_size(bucket, &entry.name).await {
                Ok(Some(size)) => size,
                Ok(None) => continue,
                Err(TransferError {
                    kind: ErrorKind::NotFound,
                    ..
                }) => continue,
                Err(e) => {
                    warn!("Could not get size of {}/{}: {}", bucket, entry.name, e);
                    continue;
                }
            };
            let filename = basename(&entry.name);
            if filename.trim().is_empty() {
                continue;
            }
            let key = JobKey::new(bucket, &entry.name, filename);
            tally.add(manifest, key, size, &entry.name)?;
        }
    }

    Ok(tally)
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
