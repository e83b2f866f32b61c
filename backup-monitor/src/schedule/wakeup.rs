//! Level-triggered "wake the scheduler now" signal.
//!
//! Once set, every waiter resolves immediately until the signal is cleared,
//! so a wakeup raised before the scheduler starts waiting is never lost.

use tokio::sync::watch;

pub struct WakeupSignal {
    state: watch::Sender<bool>,
}

impl WakeupSignal {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn clear(&self) {
        self.state.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the signal is set
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for WakeupSignal {
    fn default() -> Self {
        Self::new()
    }
}
