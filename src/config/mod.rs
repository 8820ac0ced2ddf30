mod file_config;

pub use file_config::{FileConfig, TransferConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DESTINATION: &str = "./s3_downloads";
pub const DEFAULT_BUCKETS_FILE: &str = "buckets.txt";
pub const DEFAULT_MANIFEST: &str = "download_manifest.json";
pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub destination: PathBuf,
    pub buckets_file: PathBuf,
    pub manifest: PathBuf,
    pub profile: String,
    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_failed: bool,
    pub generate_only: bool,
    pub dry_run: bool,
    pub show_failed: bool,
    pub no_dashboard: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            destination: PathBuf::from(DEFAULT_DESTINATION),
            buckets_file: PathBuf::from(DEFAULT_BUCKETS_FILE),
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            profile: DEFAULT_PROFILE.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_failed: false,
            generate_only: false,
            dry_run: false,
            show_failed: false,
            no_dashboard: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub destination: PathBuf,
    pub buckets_file: PathBuf,
    pub manifest: PathBuf,
    pub profile: String,

    // Run modes (CLI only)
    pub retry_failed: bool,
    pub generate_only: bool,
    pub dry_run: bool,
    pub show_failed: bool,

    // Transfer engine settings (with defaults)
    pub transfer: TransferSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let destination = file
            .destination
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.destination.clone());
        let buckets_file = file
            .buckets_file
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.buckets_file.clone());
        let manifest = file
            .manifest
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.manifest.clone());
        let profile = file.profile.unwrap_or_else(|| cli.profile.clone());

        if destination.exists() && !destination.is_dir() {
            bail!("Destination is not a directory: {:?}", destination);
        }
        if profile.trim().is_empty() {
            bail!("profile must not be empty");
        }

        // Transfer settings - merge file config with defaults
        let defaults = TransferSettings::default();
        let tf = file.transfer.unwrap_or_default();
        let transfer = TransferSettings {
            max_workers: file.max_workers.unwrap_or(cli.max_workers),
            max_retries: file.max_retries.unwrap_or(cli.max_retries),
            initial_backoff_secs: tf
                .initial_backoff_secs
                .unwrap_or(defaults.initial_backoff_secs),
            max_backoff_secs: tf.max_backoff_secs.unwrap_or(defaults.max_backoff_secs),
            backoff_multiplier: tf.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
            large_object_threshold_mb: tf
                .large_object_threshold_mb
                .unwrap_or(defaults.large_object_threshold_mb),
            queue_timeout_secs: tf.queue_timeout_secs.unwrap_or(defaults.queue_timeout_secs),
            shutdown_grace_secs: tf
                .shutdown_grace_secs
                .unwrap_or(defaults.shutdown_grace_secs),
            progress_interval_ms: tf
                .progress_interval_ms
                .unwrap_or(defaults.progress_interval_ms),
            session_revalidate_secs: tf
                .session_revalidate_secs
                .unwrap_or(defaults.session_revalidate_secs),
            dashboard: !cli.no_dashboard && tf.dashboard.unwrap_or(defaults.dashboard),
        };
        transfer.validate()?;

        Ok(Self {
            destination,
            buckets_file,
            manifest,
            profile,
            retry_failed: cli.retry_failed,
            generate_only: cli.generate_only,
            dry_run: cli.dry_run,
            show_failed: cli.show_failed,
            transfer,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub max_workers: usize,
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub large_object_threshold_mb: u64,
    pub queue_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub progress_interval_ms: u64,
    pub session_revalidate_secs: u64,
    pub dashboard: bool,
}

impl TransferSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            bail!(
                "backoff_multiplier must be a positive number, got {}",
                self.backoff_multiplier
            );
        }
        if self.progress_interval_ms == 0 {
            bail!("progress_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn large_object_threshold_bytes(&self) -> u64 {
        self.large_object_threshold_mb.saturating_mul(1024 * 1024)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn session_revalidate(&self) -> Duration {
        Duration::from_secs(self.session_revalidate_secs)
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_secs: 5,
            max_backoff_secs: 30,
            backoff_multiplier: 2.0,
            large_object_threshold_mb: 100,
            queue_timeout_secs: 5,
            shutdown_grace_secs: 30,
            progress_interval_ms: 250,
            session_revalidate_secs: 300,
            dashboard: true,
        }
    }
}
