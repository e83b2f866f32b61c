//! User-requested pause window, persisted across restarts.
//!
//! Only the end of the window is stored. "Paused" is always derived from
//! `now <= until`, so an expired window needs no cleanup.

use crate::utils::errors::lock_unpoisoned;
use chrono::{DateTime, Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PauseWindow {
    path: PathBuf,
    until: Mutex<Option<DateTime<Local>>>,
}

impl PauseWindow {
    /// Read the persisted window. Unreadable or corrupt state means "not paused".
    pub fn load(path: PathBuf) -> Self {
        let until = read_pause_file(&path);
        if let Some(until) = until {
            info!("Restored pause window until {}", until.to_rfc3339());
        }
        Self {
            path,
            until: Mutex::new(until),
        }
    }

    /// Set or clear the window and persist it. Persistence errors are logged only.
    pub fn set(&self, until: Option<DateTime<Local>>) {
        *lock_unpoisoned(&self.until) = until;

        let persisted = match until {
            Some(until) => std::fs::write(&self.path, until.to_rfc3339()),
            None => match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = persisted {
            warn!(path = %self.path.display(), error = %e, "Failed to persist pause state");
        }
    }

    pub fn until(&self) -> Option<DateTime<Local>> {
        *lock_unpoisoned(&self.until)
    }

    pub fn is_paused_at(&self, now: DateTime<Local>) -> bool {
        self.until().is_some_and(|until| now <= until)
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused_at(Local::now())
    }

    /// Time left in the window, or `None` when not paused at `now`
    pub fn remaining(&self, now: DateTime<Local>) -> Option<Duration> {
        self.until()
            .filter(|until| now <= *until)
            .map(|until| (until - now).to_std().unwrap_or_default())
    }
}

fn read_pause_file(path: &Path) -> Option<DateTime<Local>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read pause state");
            return None;
        }
    };

    let parsed = parse_timestamp(content.trim());
    if parsed.is_none() {
        warn!(path = %path.display(), "Ignoring corrupt pause state {:?}", content);
    }
    parsed
}

/// RFC 3339, or a naive ISO-8601 timestamp interpreted as local time
fn parse_timestamp(text: &str) -> Option<DateTime<Local>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Local));
    }
    debug!("Pause timestamp is not RFC 3339, trying naive format");
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
}
