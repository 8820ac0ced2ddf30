//! Progress module
//!
//! Aggregates concurrent worker progress into a consistent live view and
//! hands snapshots to observers on a fixed cadence.

mod aggregator;
mod dashboard;
mod reporter;
mod throttle;

pub use aggregator::{
    Eta, OverallStats, ProgressAggregator, ProgressSnapshot, WorkerState, WorkerStatus,
};
pub use dashboard::{DashboardLogWriter, DashboardObserver};
pub use reporter::{LogObserver, ProgressObserver, ProgressReporter};
pub use throttle::ProgressThrottle;
