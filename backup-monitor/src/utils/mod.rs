//! Utility modules for the backup monitor.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{lock_unpoisoned, MonitorError, Result};
