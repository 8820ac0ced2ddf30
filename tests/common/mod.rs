//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{test_options, TestHarness};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::test]
//! async fn test_single_object() {
//!     let harness = TestHarness::new();
//!     harness.add_object("bucket", "data/file.bin", 10);
//!     let summary = harness
//!         .swarm(test_options(2))
//!         .run(CancellationToken::new())
//!         .await
//!         .unwrap();
//!     assert_eq!(summary.completed, 1);
//! }
//! ```

#![allow(dead_code)]

mod fixtures;
mod session;
mod store;

pub use fixtures::*;
pub use session::ScriptedSession;
pub use store::MockObjectStore;
