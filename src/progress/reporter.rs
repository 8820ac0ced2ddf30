//! Periodic progress reporting.
//!
//! The reporter owns the render cadence. Workers only ever touch the
//! aggregator, observers only ever see snapshots.

use super::aggregator::{ProgressAggregator, ProgressSnapshot};
use crate::format::{format_rate, format_size};
use crate::manifest::ManifestStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Receives progress snapshots on the reporter's cadence.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot);

    /// Called once with the final snapshot.
    fn on_finish(&mut self, _snapshot: &ProgressSnapshot) {}
}

/// Drives observers from a fixed-interval timer.
pub struct ProgressReporter {
    aggregator: Arc<ProgressAggregator>,
    manifest: Arc<dyn ManifestStore>,
    interval: Duration,
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl ProgressReporter {
    pub fn new(
        aggregator: Arc<ProgressAggregator>,
        manifest: Arc<dyn ManifestStore>,
        interval: Duration,
    ) -> Self {
        Self {
            aggregator,
            manifest,
            interval,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Report until `shutdown` fires, then deliver the final snapshot.
    pub async fn run(mut self, shutdown: CancellationToken) -> ProgressSnapshot {
        debug!(
            "Progress reporter starting (interval={}ms, observers={})",
            self.interval.as_millis(),
            self.observers.len()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.refresh();
                    for observer in &mut self.observers {
                        observer.on_progress(&snapshot);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        let snapshot = self.refresh();
        for observer in &mut self.observers {
            observer.on_finish(&snapshot);
        }
        debug!("Progress reporter stopped");
        snapshot
    }

    fn refresh(&self) -> ProgressSnapshot {
        self.aggregator.reconcile(&self.manifest.stats());
        self.aggregator.snapshot()
    }
}

/// Observer that writes a progress line to the log every `every`.
pub struct LogObserver {
    every: Duration,
    last: Option<Instant>,
}

impl LogObserver {
    pub fn new(every: Duration) -> Self {
        Self { every, last: None }
    }
}

impl ProgressObserver for LogObserver {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        if self.last.is_some_and(|last| last.elapsed() < self.every) {
            return;
        }
        self.last = Some(Instant::now());

        let overall = &snapshot.overall;
        info!(
            "Progress: {}/{} files ({} failed), {} of {} ({:.1}%), {} active workers, {}, ETA {}",
            overall.completed_jobs,
            overall.total_jobs,
            overall.failed_jobs,
            format_size(overall.downloaded_bytes),
            format_size(overall.total_bytes),
            snapshot.percent_bytes(),
            overall.active_workers,
            format_rate(snapshot.speed),
            snapshot.eta
        );
    }

    fn on_finish(&mut self, snapshot: &ProgressSnapshot) {
        info!(
            "Finished: {}/{} files, {} failed, {} retries",
            snapshot.overall.completed_jobs,
            snapshot.overall.total_jobs,
            snapshot.overall.failed_jobs,
            snapshot.overall.total_retries
        );
    }
}
