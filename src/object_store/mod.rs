//! Remote object store boundary.
//!
//! Everything the engine needs from the remote side goes through
//! [`ObjectStore`]. Implementations map their native failures into
//! [`TransferError`] before returning.

mod s3;

pub use s3::S3ObjectStore;

use crate::transfer::TransferError;
use async_trait::async_trait;
use std::path::Path;

/// One entry of a delimited top-level listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Key of a file, or prefix of a folder without its trailing `/`
    pub name: String,
    pub is_folder: bool,
}

/// One object of a recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
}

/// Cumulative-bytes progress callback handed to [`ObjectStore::download`].
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Trait for remote object store operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Probe whether `bucket` is reachable with the current credentials.
    async fn check_access(&self, bucket: &str) -> Result<(), TransferError>;

    /// List the direct children of `prefix` (folders and files).
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteEntry>, TransferError>;

    /// List every object below `prefix`, recursively.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<RemoteObject>, TransferError>;

    /// Size of `key`, or `None` if it does not exist.
    async fn head_size(&self, bucket: &str, key: &str) -> Result<Option<u64>, TransferError>;

    /// Transfer `key` to `dest`, overwriting it. `on_progress` receives the
    /// cumulative number of bytes written so far. Returns the final size.
    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, TransferError>;
}
