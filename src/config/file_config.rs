use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub destination: Option<String>,
    pub buckets_file: Option<String>,
    pub manifest: Option<String>,
    pub profile: Option<String>,
    pub max_workers: Option<usize>,
    pub max_retries: Option<u32>,

    // Tuning
    pub transfer: Option<TransferConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TransferConfig {
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub large_object_threshold_mb: Option<u64>,
    pub queue_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub progress_interval_ms: Option<u64>,
    pub session_revalidate_secs: Option<u64>,
    /// Show the live terminal dashboard instead of periodic log lines
    pub dashboard: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
