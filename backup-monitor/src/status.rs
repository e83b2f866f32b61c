//! Status derivation for presentation layers.
//!
//! [`derive`] is a pure function of a [`StatusSnapshot`]. The snapshot is
//! captured once under the process lock, so rendering never needs to lock
//! again while a lock is held.

use crate::executor::{LastRun, ProcessSnapshot, RunOutcome, EXIT_CODE_PARTIAL};
use crate::utils::format::{format_days, format_minutes, truncate_chars};
use chrono::{DateTime, Local};
use serde::Serialize;

const TITLE_LOG_CHARS: usize = 64;
const MENU_LOG_CHARS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Nothing has run since startup
    Idle,
    Running,
    Paused,
    Good,
    Warning,
    Failed,
}

impl Status {
    /// Raise to at least `Warning`; never lowers severity
    fn escalate(self) -> Self {
        match self {
            Status::Warning | Status::Failed => self,
            _ => Status::Warning,
        }
    }
}

/// Settings that influence how a snapshot is classified
#[derive(Debug, Clone, Copy)]
pub struct StatusOptions {
    pub ignore_exit_code_3: bool,
    pub no_backup_warning_seconds: u64,
    pub min_idle_seconds: u64,
}

/// Everything the derivation reads, captured at one instant
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub process: ProcessSnapshot,
    pub pause_until: Option<DateTime<Local>>,
    pub now: DateTime<Local>,
    /// Last line of the run log, only meaningful while running
    pub current_log_line: Option<String>,
}

impl StatusSnapshot {
    fn is_paused(&self) -> bool {
        self.pause_until.is_some_and(|until| self.now <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: Status,
    /// One-line summary (tray tooltip)
    pub title: String,
    pub info_line_1: String,
    pub info_line_2: String,
    /// A new run may be requested
    pub runnable: bool,
    /// A run is in progress and can be stopped
    pub stoppable: bool,
    pub paused_until: Option<DateTime<Local>>,
    pub last_run: Option<LastRun>,
    pub seconds_since_last_success: Option<u64>,
}

impl StatusReport {
    /// Report shown before the first evaluation
    pub fn starting() -> Self {
        Self {
            status: Status::Idle,
            title: "Loading".to_string(),
            info_line_1: String::new(),
            info_line_2: String::new(),
            runnable: false,
            stoppable: false,
            paused_until: None,
            last_run: None,
            seconds_since_last_success: None,
        }
    }
}

/// "How long since the last good backup", for humans
pub fn last_ran_text(seconds_since_last_success: Option<u64>) -> String {
    match seconds_since_last_success {
        Some(secs) => format!("{} since the last successful backup", format_days(secs)),
        None => "Never ran a successful backup yet.".to_string(),
    }
}

pub fn describe_exit_code(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

pub fn derive(snapshot: &StatusSnapshot, options: &StatusOptions) -> StatusReport {
    let process = &snapshot.process;
    let last_ran = last_ran_text(process.seconds_since_last_success);
    let paused = snapshot.is_paused();
    let log_line = snapshot.current_log_line.as_deref().unwrap_or("");

    let (status, title) = if process.running {
        (
            Status::Running,
            format!("In progress: {}", truncate_chars(log_line, TITLE_LOG_CHARS)),
        )
    } else if paused {
        let until = snapshot
            .pause_until
            .map(|until| until.format("%Y-%m-%d %I:%M %p").to_string())
            .unwrap_or_default();
        (Status::Paused, format!("Paused until {}", until))
    } else {
        let (status, title) = classify(process.last_run.as_ref(), options, &last_ran);
        overlay_staleness(status, title, process.seconds_since_last_success, options, &last_ran)
    };

    let info_line_1 = if process.running {
        format!("Running: {}", truncate_chars(log_line, MENU_LOG_CHARS))
    } else {
        format!("Wait for idle for {}", format_minutes(options.min_idle_seconds))
    };

    StatusReport {
        status,
        title,
        info_line_1,
        info_line_2: last_ran,
        runnable: !process.running && !paused,
        stoppable: process.running,
        paused_until: snapshot.pause_until.filter(|_| paused),
        last_run: process.last_run.clone(),
        seconds_since_last_success: process.seconds_since_last_success,
    }
}

fn classify(last_run: Option<&LastRun>, options: &StatusOptions, last_ran: &str) -> (Status, String) {
    match last_run {
        None => (Status::Idle, String::new()),
        Some(LastRun::LaunchFailed { error }) => (
            Status::Failed,
            format!(
                "Could not start the backup executable: {}. Check the configuration.",
                error
            ),
        ),
        Some(LastRun::Completed(RunOutcome { exit_code, cancelled })) => {
            let partial = *exit_code == Some(EXIT_CODE_PARTIAL);
            if *exit_code == Some(0) || (partial && options.ignore_exit_code_3) {
                (Status::Good, last_ran.to_string())
            } else if *cancelled {
                (Status::Warning, "Last run cancelled by user".to_string())
            } else if partial {
                (
                    Status::Warning,
                    "Some files were not backed up. Check the logs.".to_string(),
                )
            } else if let Some(code) = exit_code {
                (
                    Status::Failed,
                    format!("Last back up failed with code {}. Check the logs.", code),
                )
            } else {
                (
                    Status::Failed,
                    "Last back up was terminated before finishing. Check the logs.".to_string(),
                )
            }
        }
    }
}

fn overlay_staleness(
    status: Status,
    title: String,
    seconds_since_last_success: Option<u64>,
    options: &StatusOptions,
    last_ran: &str,
) -> (Status, String) {
    match seconds_since_last_success {
        None => {
            let title = if title.is_empty() || title == last_ran {
                last_ran.to_string()
            } else {
                format!("{} {}", last_ran, title)
            };
            (status.escalate(), title)
        }
        Some(secs) if secs > options.no_backup_warning_seconds => (
            status.escalate(),
            format!("It's been a while since the last successful backup! {}", title)
                .trim_end()
                .to_string(),
        ),
        Some(_) => (status, title),
    }
}
