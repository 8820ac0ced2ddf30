//! Destination path computation for transfer jobs.

use crate::manifest::Job;
use std::path::{Path, PathBuf};

/// Where a job's object lives remotely and where it lands locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    /// Remote key to fetch.
    pub source_key: String,
    /// Directory holding the destination file and its lock marker.
    pub dest_dir: PathBuf,
    /// Final destination file.
    pub dest_file: PathBuf,
    /// Last path segment of the job's filename. The destination file and
    /// its lock marker are both named from it. Empty when the filename has
    /// no usable segment.
    pub file_name: String,
}

/// Resolve the transfer target for `job` under `root`.
///
/// Objects nested below the job's folder keep their sub-directory layout
/// under `root/bucket/folder`. Top-level objects land directly in
/// `root/bucket`. Separators are normalized and `.`/`..` segments dropped so
/// a key can never escape `root`.
pub fn resolve_target(root: &Path, job: &Job) -> TransferTarget {
    let mut dest_dir = root.join(sanitize(&job.bucket));

    let source_key = if !job.file_path.is_empty() && job.file_path != job.filename {
        let folder_prefix = format!("{}/", job.folder);
        let relative = job
            .file_path
            .strip_prefix(&folder_prefix)
            .unwrap_or(&job.file_path);
        let subdir = relative.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

        for part in [sanitize(&job.folder), sanitize(subdir)] {
            if !part.as_os_str().is_empty() {
                dest_dir.push(part);
            }
        }
        job.file_path.clone()
    } else if job.folder != job.filename {
        job.folder.clone()
    } else {
        job.filename.clone()
    };

    let file_name = job
        .filename
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .unwrap_or_default()
        .to_string();
    let dest_file = dest_dir.join(&file_name);
    TransferTarget {
        source_key,
        dest_dir,
        dest_file,
        file_name,
    }
}

/// Turn a `/`-or-`\`-separated remote path into a relative local path.
fn sanitize(path: &str) -> PathBuf {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect()
}
