//! Filesystem lock markers.
//!
//! A destination file `name` is being written while `name.lock` exists next
//! to it. Markers are created with an exclusive create, so of two concurrent
//! acquirers (in this process or another) at most one wins. The marker's
//! contents are diagnostic only and never parsed back.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_SUFFIX: &str = ".lock";

/// Path of the lock marker for `filename` in `dest_dir`.
pub fn lock_path(dest_dir: &Path, filename: &str) -> PathBuf {
    dest_dir.join(format!("{}{}", filename, LOCK_SUFFIX))
}

/// Returns true if a lock marker exists for `filename` in `dest_dir`.
pub fn is_locked(dest_dir: &Path, filename: &str) -> bool {
    lock_path(dest_dir, filename).exists()
}

/// Try to take the lock for `filename` in `dest_dir`.
///
/// Returns `Ok(None)` if the marker already exists (someone else holds it),
/// `Err` if the marker could not be created for any other reason.
pub fn acquire(dest_dir: &Path, filename: &str) -> io::Result<Option<LockHandle>> {
    let path = lock_path(dest_dir, filename);
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(e),
    };

    let handle = LockHandle {
        path,
        released: false,
    };
    // Once the marker exists the handle owns it, so a failed write still
    // removes it on drop.
    writeln!(
        file,
        "Locked by process {} at {}",
        std::process::id(),
        Utc::now().to_rfc3339()
    )?;

    debug!("Acquired lock {:?}", handle.path);
    Ok(Some(handle))
}

/// Ownership of one lock marker. The marker is removed exactly once, either
/// by [`LockHandle::release`] or when the handle is dropped.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Filesystem errors are logged and swallowed.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released lock {:?}", self.path),
            Err(e) => warn!("Failed to remove lock file {:?}: {}", self.path, e),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.remove();
    }
}
