//! Bucket list file.
//!
//! Plain text, one bucket name per line. Blank lines and lines starting
//! with `#` are ignored.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

const SAMPLE_BUCKETS: &str = "\
# Buckets to download, one per line. Lines starting with # are ignored.
example-exports
example-resources
example-imports
";

/// Result of loading the bucket list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketList {
    Loaded(Vec<String>),
    /// The file did not exist and a sample was written in its place.
    SampleCreated,
}

/// Load the bucket list at `path`, writing a sample file if it is missing.
pub fn load_buckets(path: &Path) -> Result<BucketList> {
    if !path.exists() {
        std::fs::write(path, SAMPLE_BUCKETS)
            .with_context(|| format!("Failed to create sample buckets file {:?}", path))?;
        info!("Created example buckets file {:?}", path);
        return Ok(BucketList::SampleCreated);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read buckets file {:?}", path))?;
    Ok(BucketList::Loaded(parse_buckets(&content)))
}

pub fn parse_buckets(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
