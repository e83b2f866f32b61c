//! Signal handling for the monitor process.
//!
//! SIGINT and SIGTERM stop the monitor. SIGHUP stops it and asks the owning
//! process to relaunch itself, so a changed configuration gets picked up.

use crate::schedule::command::MonitorHandle;
use tokio::signal;
use tracing::info;

/// Why the process is going down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Reload,
}

impl ShutdownReason {
    pub fn restart(self) -> bool {
        matches!(self, ShutdownReason::Reload)
    }
}

/// Forwards process signals to the scheduler
pub struct ShutdownCoordinator {
    handle: MonitorHandle,
}

impl ShutdownCoordinator {
    pub fn new(handle: MonitorHandle) -> Self {
        Self { handle }
    }

    /// Wait for SIGINT, SIGTERM or SIGHUP
    pub async fn wait_for_signal() -> ShutdownReason {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(unix)]
        let hangup = async {
            signal::unix::signal(signal::unix::SignalKind::hangup())
                .expect("Failed to install SIGHUP handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();
        #[cfg(not(unix))]
        let hangup = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down");
                ShutdownReason::Interrupt
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down");
                ShutdownReason::Terminate
            }
            _ = hangup => {
                info!("Received SIGHUP, restarting");
                ShutdownReason::Reload
            }
        }
    }

    /// Forward the first signal to the scheduler, unless it stops on its own first
    pub async fn run(self) {
        let token = self.handle.shutdown_token();
        tokio::select! {
            reason = Self::wait_for_signal() => self.forward(reason),
            _ = token.cancelled() => {}
        }
    }

    fn forward(&self, reason: ShutdownReason) {
        info!(?reason, "Stopping monitor");
        self.handle.request_shutdown(reason.restart());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::command::{self, SchedulerCommand};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_only_reload_restarts() {
        assert!(ShutdownReason::Reload.restart());
        assert!(!ShutdownReason::Interrupt.restart());
        assert!(!ShutdownReason::Terminate.restart());
    }

    #[tokio::test]
    async fn test_signal_is_forwarded() {
        let (handle, mut receiver, _status) = command::channel(CancellationToken::new());
        let coordinator = ShutdownCoordinator::new(handle);

        coordinator.forward(ShutdownReason::Reload);

        assert_eq!(
            receiver.recv().await,
            Some(SchedulerCommand::ShutdownRequested { restart: true })
        );
    }

    #[tokio::test]
    async fn test_run_returns_when_monitor_stops() {
        let token = CancellationToken::new();
        let (handle, _receiver, _status) = command::channel(token.clone());
        let task = tokio::spawn(ShutdownCoordinator::new(handle).run());

        token.cancel();
        task.await.unwrap();
    }
}
