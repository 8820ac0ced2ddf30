//! Terminal dashboard built on indicatif.

use super::aggregator::{ProgressSnapshot, WorkerState, WorkerStatus};
use super::reporter::ProgressObserver;
use crate::format::{format_rate, format_size};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;

const OVERALL_TEMPLATE: &str =
    "{prefix:.bold.cyan} [{bar:40.green/white}] {bytes}/{total_bytes} {msg}";
const WORKER_TEMPLATE: &str = "{prefix:>4.cyan} [{bar:24.cyan/blue}] {msg}";
const BAR_CHARS: &str = "━━╌";
const MAX_NAME_WIDTH: usize = 28;

/// One overall bar plus one bar per worker slot.
pub struct DashboardObserver {
    // Kept alive so the bars stay attached.
    _multi: MultiProgress,
    overall: ProgressBar,
    workers: Vec<ProgressBar>,
}

impl DashboardObserver {
    /// Attach the bars to `multi`. Logs written through a [`DashboardLogWriter`]
    /// over the same `multi` are printed above the bars.
    pub fn new(multi: MultiProgress, worker_count: usize) -> Self {

        let overall = multi.add(ProgressBar::new(0));
        overall.set_style(style(OVERALL_TEMPLATE));
        overall.set_prefix("S3Swarm");

        let workers = (0..worker_count)
            .map(|id| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(style(WORKER_TEMPLATE));
                bar.set_prefix(format!("#{}", id));
                bar
            })
            .collect();

        Self {
            _multi: multi,
            overall,
            workers,
        }
    }
}

impl ProgressObserver for DashboardObserver {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        let overall = &snapshot.overall;
        self.overall.set_length(overall.total_bytes);
        self.overall.set_position(overall.downloaded_bytes);
        self.overall.set_message(format!(
            "| {}/{} files | {} failed | {} active | {} retries | {} | ETA {}",
            overall.completed_jobs,
            overall.total_jobs,
            overall.failed_jobs,
            overall.active_workers,
            overall.total_retries,
            format_rate(snapshot.speed),
            snapshot.eta
        ));

        for (bar, worker) in self.workers.iter().zip(&snapshot.workers) {
            bar.set_length(worker.file_size.max(1));
            bar.set_position(worker.bytes_transferred.min(worker.file_size));
            bar.set_message(worker_line(worker));
        }
    }

    fn on_finish(&mut self, snapshot: &ProgressSnapshot) {
        for bar in &self.workers {
            bar.finish_and_clear();
        }
        self.overall.finish_with_message(format!(
            "| {}/{} files | {} failed | done in {}",
            snapshot.overall.completed_jobs,
            snapshot.overall.total_jobs,
            snapshot.overall.failed_jobs,
            crate::format::format_duration(snapshot.elapsed)
        ));
    }
}

/// Log sink for the tracing `fmt` layer. Each line is written to stderr with
/// the dashboard suspended, so log output never tears a redraw.
#[derive(Clone, Default)]
pub struct DashboardLogWriter {
    multi: MultiProgress,
}

impl DashboardLogWriter {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

impl Write for DashboardLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.multi.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for DashboardLogWriter {
    type Writer = DashboardLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn style(template: &str) -> ProgressStyle {
    match ProgressStyle::with_template(template) {
        Ok(style) => style.progress_chars(BAR_CHARS),
        Err(_) => ProgressStyle::default_bar(),
    }
}

fn worker_line(worker: &WorkerState) -> String {
    let name = worker
        .current_job
        .as_ref()
        .map(|key| truncate_left(&key.filename, MAX_NAME_WIDTH))
        .unwrap_or_default();

    match worker.status {
        WorkerStatus::Downloading | WorkerStatus::Retrying => format!(
            "{:<11} {:<width$} {}/{} {}",
            worker.status.as_str(),
            name,
            format_size(worker.bytes_transferred),
            format_size(worker.file_size),
            format_rate(worker.speed()),
            width = MAX_NAME_WIDTH
        ),
        WorkerStatus::Failed => format!(
            "{:<11} {}",
            worker.status.as_str(),
            worker.last_error.as_deref().unwrap_or_default()
        ),
        WorkerStatus::Idle | WorkerStatus::Completed => worker.status.as_str().to_string(),
    }
}

/// Keep the tail of `name`, which is the part that tells files apart.
fn truncate_left(name: &str, max: usize) -> String {
    let count = name.chars().count();
    if count <= max {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (max - 3)).collect();
    format!("...{}", tail)
}
