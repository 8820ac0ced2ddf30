//! Transfer module
//!
//! Error taxonomy, retry policy, destination layout and the per-job
//! executor that ties them to the manifest and the object store.

mod error;
mod executor;
mod paths;
mod retry_policy;

pub use error::{Classification, ErrorKind, TransferError};
pub use executor::{
    JobOutcome, TransferExecutor, CREDENTIAL_ERROR, DEFAULT_LARGE_OBJECT_THRESHOLD,
    INVALID_ENTRY_ERROR,
};
pub use paths::{resolve_target, TransferTarget};
pub use retry_policy::RetryPolicy;
