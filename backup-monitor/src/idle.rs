//! Idle-time sensing.
//!
//! The monitor only needs "seconds since the last user input". How that is
//! measured is platform specific, so it sits behind [`IdleSensor`]. The
//! default sensor runs an external command (`xprintidle` on X11) and parses
//! the number it prints.

use crate::config::{IdleConfig, IdleUnit};
use crate::utils::errors::{MonitorError, Result};
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const SENSOR_TIMEOUT: Duration = Duration::from_secs(5);

pub type IdleFuture<'a> = Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

/// Source of "seconds since last user input".
pub trait IdleSensor: Send + Sync {
    fn idle_seconds(&self) -> IdleFuture<'_>;
}

/// Runs a command and reads the idle time from its stdout.
pub struct CommandIdleSensor {
    program: String,
    args: Vec<String>,
    unit: IdleUnit,
}

impl CommandIdleSensor {
    pub fn new(program: String, args: Vec<String>, unit: IdleUnit) -> Self {
        Self {
            program,
            args,
            unit,
        }
    }

    async fn query(&self) -> Result<u64> {
        let output = tokio::time::timeout(
            SENSOR_TIMEOUT,
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| MonitorError::IdleSensor(format!("{} timed out", self.program)))?
        .map_err(|e| MonitorError::IdleSensor(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(MonitorError::IdleSensor(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        parse_idle_output(&String::from_utf8_lossy(&output.stdout), self.unit)
    }
}

impl IdleSensor for CommandIdleSensor {
    fn idle_seconds(&self) -> IdleFuture<'_> {
        Box::pin(self.query())
    }
}

/// Reports a stored value. Used when no sensor command is configured
/// (always idle) and by tests that script the idle time.
#[derive(Clone)]
pub struct FixedIdleSensor {
    seconds: Arc<AtomicU64>,
}

impl FixedIdleSensor {
    pub fn new(seconds: u64) -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(seconds)),
        }
    }

    pub fn always_idle() -> Self {
        Self::new(u64::MAX)
    }

    pub fn set(&self, seconds: u64) {
        self.seconds.store(seconds, Ordering::SeqCst);
    }
}

impl IdleSensor for FixedIdleSensor {
    fn idle_seconds(&self) -> IdleFuture<'_> {
        let seconds = self.seconds.load(Ordering::SeqCst);
        Box::pin(async move { Ok(seconds) })
    }
}

/// Build the sensor described by the `[idle]` section.
pub fn from_config(config: &IdleConfig) -> Arc<dyn IdleSensor> {
    match config.command.split_first() {
        Some((program, args)) => Arc::new(CommandIdleSensor::new(
            program.clone(),
            args.to_vec(),
            config.unit,
        )),
        None => {
            tracing::warn!("No idle sensor command configured, treating the machine as always idle");
            Arc::new(FixedIdleSensor::always_idle())
        }
    }
}

fn parse_idle_output(output: &str, unit: IdleUnit) -> Result<u64> {
    let trimmed = output.trim();
    let value: u64 = trimmed
        .parse()
        .map_err(|_| MonitorError::IdleSensor(format!("unexpected sensor output: {:?}", trimmed)))?;
    Ok(match unit {
        IdleUnit::Millis => value / 1000,
        IdleUnit::Seconds => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_idle_output() {
        assert_eq!(parse_idle_output("12345\n", IdleUnit::Millis).unwrap(), 12);
        assert_eq!(parse_idle_output(" 42 ", IdleUnit::Seconds).unwrap(), 42);
        assert!(parse_idle_output("idle", IdleUnit::Seconds).is_err());
        assert!(parse_idle_output("", IdleUnit::Millis).is_err());
    }

    #[tokio::test]
    async fn test_fixed_sensor() {
        let sensor = FixedIdleSensor::new(10);
        assert_eq!(sensor.idle_seconds().await.unwrap(), 10);
        sensor.set(301);
        assert_eq!(sensor.idle_seconds().await.unwrap(), 301);
    }

    #[tokio::test]
    async fn test_empty_command_is_always_idle() {
        let config = IdleConfig {
            command: Vec::new(),
            unit: IdleUnit::Seconds,
        };
        let sensor = from_config(&config);
        assert_eq!(sensor.idle_seconds().await.unwrap(), u64::MAX);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sensor() {
        let sensor = CommandIdleSensor::new(
            "/bin/sh".to_string(),
            vec!["-c".to_string(), "echo 7000".to_string()],
            IdleUnit::Millis,
        );
        assert_eq!(sensor.idle_seconds().await.unwrap(), 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sensor_failure() {
        let sensor = CommandIdleSensor::new(
            "/bin/sh".to_string(),
            vec!["-c".to_string(), "exit 1".to_string()],
            IdleUnit::Seconds,
        );
        assert!(matches!(
            sensor.idle_seconds().await,
            Err(MonitorError::IdleSensor(_))
        ));
    }
}
