//! Scheduler loop - decides when the backup runs.
//!
//! Each iteration re-derives the next action from scratch (pause state,
//! pending run request, idle time), computes one wait, then sleeps until the
//! wait elapses or the [`WakeupSignal`] is raised. Commands from presentation
//! layers are drained by a pump that runs in the same task as the loop, so
//! both interleave cooperatively and a stop or pause takes effect while a
//! run is in progress.

pub mod command;
pub mod pause;
pub mod wakeup;

use crate::config::{Config, ScheduleConfig};
use crate::executor::{ProcessManager, RunOutcome};
use crate::idle::{self, IdleSensor};
use crate::notify::{LogNotifier, Notifier, StaleWarningThrottle};
use crate::status::{self, describe_exit_code, StatusOptions, StatusReport, StatusSnapshot};
use crate::utils::errors::{lock_unpoisoned, MonitorError, Result};
use chrono::{Local, TimeDelta};
use command::{CommandReceiver, MonitorHandle, SchedulerCommand};
use futures_util::FutureExt;
use pause::PauseWindow;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wakeup::WakeupSignal;

/// Longest single wait while paused, so a changed clock is noticed
pub const PAUSE_WAIT_CAP: Duration = Duration::from_secs(3600);

/// Wait before re-checking after a start was refused or an iteration failed
pub const RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Longest a published status may go without being re-derived
pub const STATUS_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

const NOTIFY_LOG_LINES: usize = 3;

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Collaborators and settings the scheduler is built from
pub struct MonitorContext {
    pub schedule: ScheduleConfig,
    pub processes: Arc<ProcessManager>,
    pub pause: PauseWindow,
    pub idle: Arc<dyn IdleSensor>,
    pub notifier: Arc<dyn Notifier>,
}

impl MonitorContext {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            schedule: config.schedule.clone(),
            processes: Arc::new(ProcessManager::from_config(config)?),
            pause: PauseWindow::load(config.pause_file()),
            idle: idle::from_config(&config.idle),
            notifier: Arc::new(LogNotifier),
        })
    }
}

/// How the scheduler ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorExit {
    pub restart: bool,
}

/// What a single iteration decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Paused,
    WaitForIdle,
    Ran,
    AlreadyRunning,
}

struct Scheduler {
    schedule: ScheduleConfig,
    processes: Arc<ProcessManager>,
    pause: PauseWindow,
    idle: Arc<dyn IdleSensor>,
    notifier: Arc<dyn Notifier>,
    wakeup: WakeupSignal,
    shutdown: CancellationToken,
    run_requested: AtomicBool,
    quit: AtomicBool,
    restart: AtomicBool,
    status: watch::Sender<StatusReport>,
    stale_warning: Mutex<StaleWarningThrottle>,
}

/// The scheduler together with its command queue
pub struct Monitor {
    scheduler: Scheduler,
    commands: CommandReceiver,
}

impl Monitor {
    pub fn new(context: MonitorContext) -> (Self, MonitorHandle) {
        let shutdown = CancellationToken::new();
        let (handle, commands, status) = command::channel(shutdown.clone());

        let scheduler = Scheduler {
            schedule: context.schedule,
            processes: context.processes,
            pause: context.pause,
            idle: context.idle,
            notifier: context.notifier,
            wakeup: WakeupSignal::new(),
            shutdown,
            run_requested: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            status,
            stale_warning: Mutex::new(StaleWarningThrottle::default()),
        };

        (
            Self {
                scheduler,
                commands,
            },
            handle,
        )
    }

    /// Run until shutdown is requested
    pub async fn run(self) -> MonitorExit {
        let Monitor {
            scheduler,
            commands,
        } = self;

        tokio::join!(scheduler.scheduler_loop(), scheduler.command_pump(commands));

        MonitorExit {
            restart: scheduler.restart.load(Ordering::SeqCst),
        }
    }
}

impl Scheduler {
    async fn scheduler_loop(&self) {
        info!("Scheduler loop is running");
        self.refresh_status();

        while !self.quit.load(Ordering::SeqCst) {
            let wait = match AssertUnwindSafe(self.evaluate()).catch_unwind().await {
                Ok(Ok((decision, wait))) => {
                    debug!(?decision, wait_secs = wait.as_secs(), "Scheduler iteration done");
                    wait
                }
                Ok(Err(MonitorError::Shutdown)) => {
                    debug!("Shutdown requested during iteration");
                    Duration::ZERO
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Scheduler iteration failed");
                    RETRY_BACKOFF
                }
                Err(_) => {
                    error!("Scheduler iteration panicked");
                    RETRY_BACKOFF
                }
            };

            if self.quit.load(Ordering::SeqCst) {
                break;
            }

            self.refresh_status();
            self.wait_for(wait).await;
            self.wakeup.clear();
        }

        self.processes.cancel_run();
        info!("Scheduler loop stopped");
    }

    /// Sleep for `wait` unless woken or shut down first. The status is
    /// re-derived along the way so time-based changes (a backup going stale)
    /// become visible without a new evaluation.
    async fn wait_for(&self, wait: Duration) {
        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(wait).unwrap_or(now + FAR_FUTURE);
        loop {
            let tick = tokio::time::Instant::now() + self.next_status_change();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline.min(tick)) => {}
                _ = self.wakeup.wait() => {
                    debug!("Scheduler woken up");
                    return;
                }
                _ = self.shutdown.cancelled() => return,
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            self.refresh_status();
        }
    }

    /// Time until the derived status can change on its own
    fn next_status_change(&self) -> Duration {
        let threshold = self.schedule.no_backup_warning_seconds;
        match self.processes.seconds_since_last_success() {
            Some(secs) if secs <= threshold => {
                Duration::from_secs(threshold - secs + 1).min(STATUS_REFRESH_INTERVAL)
            }
            _ => STATUS_REFRESH_INTERVAL,
        }
    }

    async fn command_pump(&self, mut commands: CommandReceiver) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => {
                        let handled =
                            std::panic::catch_unwind(AssertUnwindSafe(|| self.handle_command(command)));
                        if handled.is_err() {
                            error!(?command, "Command handler panicked");
                        }
                    }
                    None => {
                        debug!("All monitor handles dropped");
                        break;
                    }
                },
            }
        }
    }

    fn handle_command(&self, command: SchedulerCommand) {
        debug!(?command, "Handling command");
        match command {
            SchedulerCommand::RunRequested => {
                self.run_requested.store(true, Ordering::SeqCst);
                self.wakeup.set();
            }
            SchedulerCommand::StopRequested => self.processes.cancel_run(),
            SchedulerCommand::PauseToggleRequested => self.toggle_pause(),
            SchedulerCommand::ShutdownRequested { restart } => self.request_shutdown(restart),
        }
    }

    fn toggle_pause(&self) {
        if self.pause.is_paused() {
            info!("Clearing pause");
            self.pause.set(None);
        } else {
            let until = i64::try_from(self.schedule.pause_hours)
                .ok()
                .and_then(TimeDelta::try_hours)
                .and_then(|window| Local::now().checked_add_signed(window));
            let Some(until) = until else {
                error!(
                    pause_hours = self.schedule.pause_hours,
                    "Pause window out of range, not pausing"
                );
                return;
            };
            info!("Pausing backups until {}", until.to_rfc3339());
            if self.processes.is_running() {
                self.processes.cancel_run();
            }
            self.pause.set(Some(until));
        }
        self.wakeup.set();
        self.refresh_status();
    }

    fn request_shutdown(&self, restart: bool) {
        info!(restart, "Shutdown requested");
        self.processes.cancel_run();
        self.restart.store(restart, Ordering::SeqCst);
        self.quit.store(true, Ordering::SeqCst);
        self.wakeup.set();
        self.shutdown.cancel();
    }

    /// Decide and perform this iteration's action, returning the next wait
    async fn evaluate(&self) -> Result<(Decision, Duration)> {
        if let Some(remaining) = self.pause.remaining(Local::now()) {
            if self.run_requested.swap(false, Ordering::SeqCst) {
                info!("Run requested while paused, dropping the request");
            }
            let wait = remaining.min(PAUSE_WAIT_CAP);
            debug!("Paused, nothing to do for {}s", wait.as_secs());
            return Ok((Decision::Paused, wait));
        }

        if self.run_requested.swap(false, Ordering::SeqCst) {
            info!("Run requested");
            return self.run_backup().await;
        }

        let idle_seconds = self.idle.idle_seconds().await?;
        let threshold = self.schedule.min_idle_seconds;
        if idle_seconds >= threshold {
            info!(idle_seconds, "Machine is idle, starting backup");
            return self.run_backup().await;
        }

        let remaining = threshold - idle_seconds;
        debug!(idle_seconds, "Waiting {}s for idle", remaining);
        Ok((Decision::WaitForIdle, Duration::from_secs(remaining)))
    }

    async fn run_backup(&self) -> Result<(Decision, Duration)> {
        if self.quit.load(Ordering::SeqCst) {
            return Err(MonitorError::Shutdown);
        }
        if self.processes.is_running() {
            error!("Backup already running, checking again in {}s", RETRY_BACKOFF.as_secs());
            return Ok((Decision::AlreadyRunning, RETRY_BACKOFF));
        }

        let cooldown = Duration::from_secs(self.schedule.min_seconds_between_backups);
        match self.processes.start(|| self.refresh_status()).await {
            Ok(outcome) => self.notify_outcome(outcome),
            Err(MonitorError::AlreadyRunning) => {
                warn!("Backup started elsewhere, checking again in {}s", RETRY_BACKOFF.as_secs());
                return Ok((Decision::AlreadyRunning, RETRY_BACKOFF));
            }
            Err(e @ MonitorError::Launch { .. }) => {
                self.notifier
                    .notify("Could not start backup executable", &e.to_string());
            }
            Err(e) => return Err(e),
        }

        self.refresh_status();
        debug!("After run, sleeping {}s", cooldown.as_secs());
        Ok((Decision::Ran, cooldown))
    }

    fn notify_outcome(&self, outcome: RunOutcome) {
        let code = describe_exit_code(outcome.exit_code);
        let title = if outcome.cancelled {
            format!("User cancelled backup. code {}", code)
        } else if !outcome.is_success() {
            format!("Backup failed with code {}", code)
        } else {
            return;
        };
        let body = self.processes.last_log_lines(NOTIFY_LOG_LINES).join("\n");
        self.notifier.notify(&title, &body);
    }

    fn status_options(&self) -> StatusOptions {
        StatusOptions {
            ignore_exit_code_3: self.schedule.ignore_exit_code_3,
            no_backup_warning_seconds: self.schedule.no_backup_warning_seconds,
            min_idle_seconds: self.schedule.min_idle_seconds,
        }
    }

    fn status_report(&self) -> StatusReport {
        let process = self.processes.snapshot();
        let current_log_line = if process.running {
            self.processes.last_log_lines(1).pop()
        } else {
            None
        };
        let snapshot = StatusSnapshot {
            process,
            pause_until: self.pause.until(),
            now: Local::now(),
            current_log_line,
        };
        status::derive(&snapshot, &self.status_options())
    }

    /// Recompute and publish the status, warning about stale backups at most hourly
    fn refresh_status(&self) {
        let report = self.status_report();

        let idle = !report.stoppable && report.paused_until.is_none();
        let stale = report
            .seconds_since_last_success
            .map_or(true, |secs| secs > self.schedule.no_backup_warning_seconds);
        if idle && stale && !self.quit.load(Ordering::SeqCst) {
            let due = lock_unpoisoned(&self.stale_warning).should_warn(Instant::now());
            if due {
                self.notifier.notify(
                    "Backup Monitor",
                    &format!(
                        "It's been a long time since the last backup. {}",
                        report.info_line_2
                    ),
                );
            }
        }

        self.status.send_replace(report);
    }
}
