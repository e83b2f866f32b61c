//! Commands submitted to the scheduler from presentation layers.
//!
//! A [`MonitorHandle`] may be used from any thread. Every state-changing call
//! is posted to the scheduler's command queue and returns immediately; the
//! scheduler applies it in its own context and logs the result.

use crate::status::StatusReport;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    RunRequested,
    StopRequested,
    PauseToggleRequested,
    ShutdownRequested { restart: bool },
}

pub type CommandReceiver = mpsc::UnboundedReceiver<SchedulerCommand>;

#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    status: watch::Receiver<StatusReport>,
    shutdown: CancellationToken,
}

/// Create a handle together with the receiving ends the scheduler owns
pub(crate) fn channel(
    shutdown: CancellationToken,
) -> (MonitorHandle, CommandReceiver, watch::Sender<StatusReport>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    let (status_tx, status) = watch::channel(StatusReport::starting());
    (
        MonitorHandle {
            commands,
            status,
            shutdown,
        },
        receiver,
        status_tx,
    )
}

impl MonitorHandle {
    fn submit(&self, command: SchedulerCommand) {
        if self.commands.send(command).is_err() {
            debug!(?command, "Scheduler is gone, dropping command");
        }
    }

    /// Start a backup as soon as possible (ignored while paused)
    pub fn request_run(&self) {
        self.submit(SchedulerCommand::RunRequested);
    }

    /// Kill the running backup, if any
    pub fn request_stop(&self) {
        self.submit(SchedulerCommand::StopRequested);
    }

    /// Pause for the configured window, or resume if already paused
    pub fn toggle_pause(&self) {
        self.submit(SchedulerCommand::PauseToggleRequested);
    }

    /// Stop the scheduler; `restart` asks the owning process to relaunch
    pub fn request_shutdown(&self, restart: bool) {
        self.submit(SchedulerCommand::ShutdownRequested { restart });
    }

    /// Latest published status
    pub fn status(&self) -> StatusReport {
        self.status.borrow().clone()
    }

    /// Not running and not paused
    pub fn is_runnable(&self) -> bool {
        self.status.borrow().runnable
    }

    /// A run is in progress
    pub fn is_stoppable(&self) -> bool {
        self.status.borrow().stoppable
    }

    /// Receiver that changes whenever the status is republished
    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.status.clone()
    }

    /// Cancelled once shutdown has begun
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
