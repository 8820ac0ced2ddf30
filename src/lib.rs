//! s3swarm library
//!
//! Bulk, resumable S3 downloads driven by a persistent manifest. The modules
//! are exposed for the CLI and for integration tests.

pub mod buckets;
pub mod cli_style;
pub mod config;
pub mod enumerator;
pub mod format;
pub mod lock_guard;
pub mod manifest;
pub mod object_store;
pub mod pool;
pub mod progress;
pub mod session;
pub mod swarm;
pub mod transfer;

// Re-export commonly used types for convenience
pub use manifest::{Job, JobKey, JobStatus, JsonManifestStore, ManifestStore};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use session::{AwsSsoSession, CredentialSession, SharedSession};
pub use swarm::{RunSummary, Swarm, SwarmOptions};
