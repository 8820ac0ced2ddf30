//! Manifest module
//!
//! Durable ledger of every known transfer job and its lifecycle state.
//! It is the single source of truth for what remains to be done.

mod models;
mod store;

pub use models::*;
pub use store::{JsonManifestStore, ManifestStore};
