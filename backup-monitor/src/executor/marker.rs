//! Success marker for the last completed backup.
//!
//! The marker is an empty sentinel file. Its modification time is the instant
//! of the last run that exited with code 0. It is never deleted; a missing
//! file means no run has ever succeeded.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct SuccessMarker {
    path: PathBuf,
}

impl SuccessMarker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker if needed and set its modification time to now
    pub fn touch(&self) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        file.set_modified(SystemTime::now())
    }

    /// Time of the last successful run, if any
    pub fn last_success(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
    }

    /// Whole seconds since the last successful run, if any
    pub fn seconds_since(&self) -> Option<u64> {
        self.last_success().map(|at| {
            SystemTime::now()
                .duration_since(at)
                .unwrap_or_default()
                .as_secs()
        })
    }
}
