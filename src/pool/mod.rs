//! Worker pool module
//!
//! N long-lived workers pulling jobs from one shared queue, with a single
//! pool-wide session check before each job.

mod queue;
mod worker;

pub use queue::JobQueue;
pub use worker::{WorkerPool, WorkerReport};
