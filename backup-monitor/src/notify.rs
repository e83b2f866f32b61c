//! Desktop notifications.
//!
//! Showing a notification is the presentation layer's job; the scheduler only
//! decides when one is due and hands it to a [`Notifier`].

use std::time::{Duration, Instant};

/// Minimum spacing between "no recent backup" warnings
pub const STALE_WARNING_INTERVAL: Duration = Duration::from_secs(3600);

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        tracing::warn!(target: "notification", title = %title, "{}", body);
    }
}

/// Throttles the stale-backup warning to once per interval
#[derive(Debug)]
pub struct StaleWarningThrottle {
    interval: Duration,
    last_warned: Option<Instant>,
}

impl StaleWarningThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_warned: None,
        }
    }

    /// Returns true, and records `now`, if a warning may be shown
    pub fn should_warn(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_warned {
            if now.saturating_duration_since(last) < self.interval {
                tracing::debug!("Skipping stale backup warning, last one {:?} ago", now - last);
                return false;
            }
        }
        self.last_warned = Some(now);
        true
    }
}

impl Default for StaleWarningThrottle {
    fn default() -> Self {
        Self::new(STALE_WARNING_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_once_per_interval() {
        let mut throttle = StaleWarningThrottle::default();
        let start = Instant::now();

        assert!(throttle.should_warn(start));
        assert!(!throttle.should_warn(start + Duration::from_secs(60)));
        assert!(!throttle.should_warn(start + Duration::from_secs(3599)));
        assert!(throttle.should_warn(start + Duration::from_secs(3600)));
        assert!(!throttle.should_warn(start + Duration::from_secs(3601)));
    }
}
