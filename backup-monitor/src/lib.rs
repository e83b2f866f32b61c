//! Backup Monitor Library
//!
//! Runs an external backup tool (restic by default) whenever the machine has
//! been idle long enough, with pause, cancel and status reporting.

pub mod api;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod idle;
pub mod notify;
pub mod schedule;
pub mod status;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use schedule::command::MonitorHandle;
pub use schedule::{Monitor, MonitorContext, MonitorExit};
pub use utils::errors::{MonitorError, Result};
