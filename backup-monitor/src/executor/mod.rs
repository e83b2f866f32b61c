//! Backup process manager - owns the lifecycle of the external backup job.
//!
//! At most one child process exists at a time. The handle, the cancel flag
//! and the last outcome live together behind a single mutex, so a reader can
//! never observe "not running" next to a stale outcome, and a cancel request
//! can never race with the process being reaped.

pub mod log_tail;
pub mod marker;

use crate::config::Config;
use crate::utils::errors::{lock_unpoisoned, MonitorError, Result};
use marker::SuccessMarker;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often a running process is polled (and progress reported)
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Exit code restic uses when some source files could not be read
pub const EXIT_CODE_PARTIAL: i32 = 3;

/// What to launch for each run
#[derive(Debug, Clone)]
pub struct BackupCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Overlaid onto the monitor's own environment
    pub env: HashMap<String, String>,
}

/// Result of a run that actually started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The most recent run, kept until the next one finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LastRun {
    Completed(RunOutcome),
    LaunchFailed { error: String },
}

/// Consistent view of the process state, taken under one lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub running: bool,
    pub last_run: Option<LastRun>,
    pub seconds_since_last_success: Option<u64>,
}

#[derive(Default)]
struct RunSlot {
    child: Option<Child>,
    run_id: Option<Uuid>,
    cancel_requested: bool,
    last_run: Option<LastRun>,
}

/// Starts, monitors and kills the backup executable
pub struct ProcessManager {
    command: BackupCommand,
    run_log: PathBuf,
    marker: SuccessMarker,
    poll_interval: Duration,
    slot: Mutex<RunSlot>,
}

impl ProcessManager {
    pub fn new(command: BackupCommand, run_log: PathBuf, marker: SuccessMarker) -> Self {
        info!(
            program = %command.program,
            args = ?command.args,
            "Process manager initialized"
        );
        // values may be secrets
        let mut keys: Vec<&String> = command.env.keys().collect();
        keys.sort();
        info!("Backup environment overlay keys: {:?}", keys);

        Self {
            command,
            run_log,
            marker,
            poll_interval: PROGRESS_INTERVAL,
            slot: Mutex::new(RunSlot::default()),
        }
    }

    /// Override how often the running process is polled
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build a manager from configuration, reading the environment overlay
    pub fn from_config(config: &Config) -> Result<Self> {
        let command = BackupCommand {
            program: config.backup.executable.clone(),
            args: config.backup.args.clone(),
            env: config.backup_environment()?,
        };
        Ok(Self::new(
            command,
            config.run_log(),
            SuccessMarker::new(config.marker_file()),
        ))
    }

    /// Run the backup to completion.
    ///
    /// Returns [`MonitorError::AlreadyRunning`] without touching any state if a
    /// run is active, and [`MonitorError::Launch`] if the executable could not
    /// be spawned. `on_progress` is invoked once per poll interval
    /// ([`PROGRESS_INTERVAL`] unless overridden) while the process is alive.
    pub async fn start<F>(&self, mut on_progress: F) -> Result<RunOutcome>
    where
        F: FnMut(),
    {
        let run_id = Uuid::new_v4();

        {
            let mut slot = lock_unpoisoned(&self.slot);
            if slot.child.is_some() {
                return Err(MonitorError::AlreadyRunning);
            }

            info!(%run_id, program = %self.command.program, "Starting backup run");
            let (stdout, stderr) = self.open_run_log();

            let spawned = Command::new(&self.command.program)
                .args(&self.command.args)
                .envs(&self.command.env)
                .stdin(Stdio::null())
                .stdout(stdout)
                .stderr(stderr)
                .kill_on_drop(true)
                .spawn();

            // a cancel issued before this run must not leak into it
            slot.cancel_requested = false;

            match spawned {
                Ok(child) => {
                    debug!(%run_id, pid = ?child.id(), "Backup process spawned");
                    slot.child = Some(child);
                    slot.run_id = Some(run_id);
                }
                Err(source) => {
                    error!(%run_id, program = %self.command.program, error = %source, "Failed to launch backup");
                    slot.last_run = Some(LastRun::LaunchFailed {
                        error: source.to_string(),
                    });
                    return Err(MonitorError::Launch {
                        program: self.command.program.clone(),
                        source,
                    });
                }
            }
        }

        let status = self.wait_for_exit(run_id, &mut on_progress).await;
        Ok(self.finish(run_id, status))
    }

    async fn wait_for_exit<F>(&self, run_id: Uuid, on_progress: &mut F) -> std::io::Result<ExitStatus>
    where
        F: FnMut(),
    {
        loop {
            let polled = {
                let mut slot = lock_unpoisoned(&self.slot);
                match slot.child.as_mut() {
                    Some(child) => child.try_wait(),
                    None => Err(std::io::Error::other("process handle missing")),
                }
            };

            match polled {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => return Err(e),
            }

            debug!(%run_id, "Waiting for backup to finish");
            on_progress();
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn finish(&self, run_id: Uuid, status: std::io::Result<ExitStatus>) -> RunOutcome {
        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                error!(%run_id, error = %e, "Lost track of backup process");
                None
            }
        };

        let mut slot = lock_unpoisoned(&self.slot);
        if exit_code == Some(0) {
            if let Err(e) = self.marker.touch() {
                warn!(path = %self.marker.path().display(), error = %e, "Failed to update success marker");
            }
        }

        let outcome = RunOutcome {
            exit_code,
            cancelled: slot.cancel_requested,
        };
        slot.cancel_requested = false;
        slot.child = None;
        slot.run_id = None;
        slot.last_run = Some(LastRun::Completed(outcome));
        drop(slot);

        info!(%run_id, exit_code = ?outcome.exit_code, cancelled = outcome.cancelled, "Backup run finished");
        outcome
    }

    /// Truncate the run log and hand it to the child as stdout and stderr.
    /// Falls back to discarding output if the log cannot be opened.
    fn open_run_log(&self) -> (Stdio, Stdio) {
        let opened = self
            .run_log
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| File::create(&self.run_log))
            .and_then(|file| {
                let err = file.try_clone()?;
                Ok((Stdio::from(file), Stdio::from(err)))
            });

        match opened {
            Ok(stdio) => stdio,
            Err(e) => {
                warn!(path = %self.run_log.display(), error = %e, "Failed to open run log, discarding output");
                (Stdio::null(), Stdio::null())
            }
        }
    }

    /// Request cancellation and kill the process if one is running.
    ///
    /// Safe to call when idle; the flag is reset when the next run starts.
    pub fn cancel_run(&self) {
        let mut slot = lock_unpoisoned(&self.slot);
        slot.cancel_requested = true;
        let run_id = slot.run_id;
        if let Some(child) = slot.child.as_mut() {
            match child.start_kill() {
                Ok(()) => info!(run_id = ?run_id, "Backup process killed"),
                Err(e) => warn!(run_id = ?run_id, error = %e, "Failed to kill backup process"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock_unpoisoned(&self.slot).child.is_some()
    }

    pub fn last_run(&self) -> Option<LastRun> {
        lock_unpoisoned(&self.slot).last_run.clone()
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        match lock_unpoisoned(&self.slot).last_run {
            Some(LastRun::Completed(outcome)) => outcome.exit_code,
            _ => None,
        }
    }

    pub fn is_last_run_cancelled(&self) -> bool {
        matches!(
            lock_unpoisoned(&self.slot).last_run,
            Some(LastRun::Completed(RunOutcome { cancelled: true, .. }))
        )
    }

    pub fn seconds_since_last_success(&self) -> Option<u64> {
        let _slot = lock_unpoisoned(&self.slot);
        self.marker.seconds_since()
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let slot = lock_unpoisoned(&self.slot);
        ProcessSnapshot {
            running: slot.child.is_some(),
            last_run: slot.last_run.clone(),
            seconds_since_last_success: self.marker.seconds_since(),
        }
    }

    /// Trailing lines of the current or most recent run log
    pub fn last_log_lines(&self, lines: usize) -> Vec<String> {
        match log_tail::tail_last_lines(&self.run_log, lines) {
            Ok(tail) => tail,
            Err(e) => {
                debug!(path = %self.run_log.display(), error = %e, "Run log not readable");
                Vec::new()
            }
        }
    }

    pub fn run_log_path(&self) -> &Path {
        &self.run_log
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn shell_manager(dir: &TempDir, script: &str) -> ProcessManager {
        let mut env = HashMap::new();
        env.insert("BM_TEST_GREETING".to_string(), "hello-from-env".to_string());
        ProcessManager::new(
            BackupCommand {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env,
            },
            dir.path().join("logs").join("run.log"),
            SuccessMarker::new(dir.path().join("last.marker")),
        )
        .with_poll_interval(Duration::from_millis(20))
    }

    async fn wait_until_running(manager: &ProcessManager) {
        for _ in 0..200 {
            if manager.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backup never started");
    }

    #[tokio::test]
    async fn test_successful_run_touches_marker() {
        let dir = TempDir::new().unwrap();
        let manager = shell_manager(&dir, "echo snapshot saved; echo $BM_TEST_GREETING");
        assert!(manager.seconds_since_last_success().is_none());

        let outcome = manager.start(|| {}).await.unwrap();

        assert_eq!(outcome, RunOutcome { exit_code: Some(0), cancelled: false });
        assert!(!manager.is_running());
        assert_eq!(manager.last_exit_code(), Some(0));
        assert!(manager.seconds_since_last_success().unwrap() < 60);
        assert_eq!(
            manager.last_log_lines(2),
            vec!["snapshot saved", "hello-from-env"]
        );
    }

    #[tokio::test]
    async fn test_partial_exit_does_not_touch_marker() {
        let dir = TempDir::new().unwrap();
        let manager = shell_manager(&dir, "echo some files skipped >&2; exit 3");

        let outcome = manager.start(|| {}).await.unwrap();

        assert_eq!(outcome.exit_code, Some(EXIT_CODE_PARTIAL));
        assert!(!outcome.cancelled);
        assert!(manager.seconds_since_last_success().is_none());
        assert_eq!(manager.last_log_lines(1), vec!["some files skipped"]);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(shell_manager(&dir, "sleep 30"));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.start(|| {}).await })
        };
        wait_until_running(&manager).await;

        let second = manager.start(|| {}).await;
        assert!(matches!(second, Err(MonitorError::AlreadyRunning)));
        assert!(manager.is_running());
        assert!(manager.last_run().is_none());

        manager.cancel_run();
        let outcome = first.await.unwrap().unwrap();
        assert!(outcome.cancelled);
        assert_ne!(outcome.exit_code, Some(0));
        assert!(manager.is_last_run_cancelled());
        assert!(manager.seconds_since_last_success().is_none());
    }

    #[tokio::test]
    async fn test_stale_cancel_does_not_leak_into_next_run() {
        let dir = TempDir::new().unwrap();
        let manager = shell_manager(&dir, "exit 0");

        manager.cancel_run();
        let outcome = manager.start(|| {}).await.unwrap();

        assert!(!outcome.cancelled);
        assert!(!manager.is_last_run_cancelled());
    }

    #[tokio::test]
    async fn test_launch_failure_is_distinct() {
        let dir = TempDir::new().unwrap();
        let manager = ProcessManager::new(
            BackupCommand {
                program: dir.path().join("no-such-binary").display().to_string(),
                args: Vec::new(),
                env: HashMap::new(),
            },
            dir.path().join("run.log"),
            SuccessMarker::new(dir.path().join("last.marker")),
        );

        let result = manager.start(|| {}).await;

        assert!(matches!(result, Err(MonitorError::Launch { .. })));
        assert!(!manager.is_running());
        assert!(matches!(manager.last_run(), Some(LastRun::LaunchFailed { .. })));
        assert_eq!(manager.last_exit_code(), None);
    }

    #[tokio::test]
    async fn test_progress_reported_while_running() {
        let dir = TempDir::new().unwrap();
        let manager = shell_manager(&dir, "sleep 1");
        let mut ticks = 0;

        manager.start(|| ticks += 1).await.unwrap();

        // ~50 polls at 20ms; allow for scheduling jitter
        assert!(ticks >= 10);
    }

    #[tokio::test]
    async fn test_snapshot_is_consistent() {
        let dir = TempDir::new().unwrap();
        let manager = shell_manager(&dir, "exit 5");
        manager.start(|| {}).await.unwrap();

        let snapshot = manager.snapshot();
        assert!(!snapshot.running);
        assert_eq!(
            snapshot.last_run,
            Some(LastRun::Completed(RunOutcome { exit_code: Some(5), cancelled: false }))
        );
        assert!(snapshot.seconds_since_last_success.is_none());
    }
}
