//! Custom error types for the backup monitor.

use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A backup run is already in progress")]
    AlreadyRunning,

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Idle sensor error: {0}")]
    IdleSensor(String),

    #[error("Monitor is shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Guarded state is plain data that stays consistent between statements, so a
/// poisoned lock is still safe to read and overwrite.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
