//! Configuration management for the backup monitor.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`BACKUP_MONITOR__SCHEDULE__MIN_IDLE_SECONDS=600` and so on).

use crate::utils::errors::MonitorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "backup-monitor";

const PAUSE_UNTIL_FILENAME: &str = "pause_until.txt";
const MARKER_FILENAME: &str = "restic-last-successful.marker";
const RUN_LOG_FILENAME: &str = "restic-last.log";
const APP_LOG_FILENAME: &str = "backup-monitor.log";
const SETTINGS_FILENAME: &str = "settings.toml";
const ENV_PREFIX: &str = "BACKUP_MONITOR";

/// Longest pause a user can request (one year)
pub const MAX_PAUSE_HOURS: u64 = 24 * 366;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Directory holding settings, pause state, the success marker and logs
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backup executable to invoke
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// JSON file with environment variables, relative to `app_dir` unless absolute
    #[serde(default)]
    pub env_file: Option<PathBuf>,

    /// Inline environment overlay, applied over `env_file`
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds without user input before a backup starts
    #[serde(default = "default_min_idle_seconds")]
    pub min_idle_seconds: u64,

    /// Cooldown after a run before the next one may start
    #[serde(default = "default_min_seconds_between_backups")]
    pub min_seconds_between_backups: u64,

    /// Warn once the last successful backup is older than this
    #[serde(default = "default_no_backup_warning_seconds")]
    pub no_backup_warning_seconds: u64,

    /// Treat exit code 3 (some files skipped) as good for display purposes
    #[serde(default)]
    pub ignore_exit_code_3: bool,

    /// Length of the pause window requested by a pause toggle
    #[serde(default = "default_pause_hours")]
    pub pause_hours: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleUnit {
    Millis,
    Seconds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Command printing the idle time; empty means the machine is always idle
    #[serde(default = "default_idle_command")]
    pub command: Vec<String>,

    /// Unit of the number printed by `command`
    #[serde(default = "default_idle_unit")]
    pub unit: IdleUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output (stdout, file)
    #[serde(default = "default_log_output")]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the localhost control API
    #[serde(default)]
    pub enabled: bool,

    /// Port bound on 127.0.0.1
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default values
pub fn default_app_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
}

fn default_executable() -> String {
    "restic".to_string()
}

fn default_min_idle_seconds() -> u64 {
    300
}

fn default_min_seconds_between_backups() -> u64 {
    3600
}

fn default_no_backup_warning_seconds() -> u64 {
    3 * 86_400
}

fn default_pause_hours() -> u64 {
    8
}

fn default_idle_command() -> Vec<String> {
    vec!["xprintidle".to_string()]
}

fn default_idle_unit() -> IdleUnit {
    IdleUnit::Millis
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

fn default_api_port() -> u16 {
    9991
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            app_dir: default_app_dir(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            env_file: None,
            env: HashMap::new(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_idle_seconds: default_min_idle_seconds(),
            min_seconds_between_backups: default_min_seconds_between_backups(),
            no_backup_warning_seconds: default_no_backup_warning_seconds(),
            ignore_exit_code_3: false,
            pause_hours: default_pause_hours(),
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            command: default_idle_command(),
            unit: default_idle_unit(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_api_port(),
        }
    }
}

/// Locations a user may want to open from a presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorPaths {
    pub app_dir: PathBuf,
    pub app_log_path: PathBuf,
    pub run_log_path: PathBuf,
}

impl Config {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        default_app_dir().join(SETTINGS_FILENAME)
    }

    /// Load configuration from a TOML file plus `BACKUP_MONITOR__*` overrides.
    ///
    /// A missing file is fine; every field has a default.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.backup.executable.trim().is_empty() {
            return Err(MonitorError::Config(
                "backup.executable must not be empty".to_string(),
            ));
        }
        if self.schedule.pause_hours == 0 || self.schedule.pause_hours > MAX_PAUSE_HOURS {
            return Err(MonitorError::Config(format!(
                "schedule.pause_hours must be between 1 and {}",
                MAX_PAUSE_HOURS
            )));
        }
        Ok(())
    }

    /// Environment overlay for the backup process: `env_file` first, inline `env` on top
    pub fn backup_environment(&self) -> Result<HashMap<String, String>, MonitorError> {
        let mut env = HashMap::new();

        if let Some(env_file) = &self.backup.env_file {
            let path = if env_file.is_absolute() {
                env_file.clone()
            } else {
                self.monitor.app_dir.join(env_file)
            };
            let content = std::fs::read_to_string(&path).map_err(|e| {
                MonitorError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            let from_file: HashMap<String, String> = serde_json::from_str(&content)?;
            env.extend(from_file);
        }

        env.extend(
            self.backup
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(env)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.monitor.app_dir.join("logs")
    }

    pub fn pause_file(&self) -> PathBuf {
        self.monitor.app_dir.join(PAUSE_UNTIL_FILENAME)
    }

    pub fn marker_file(&self) -> PathBuf {
        self.monitor.app_dir.join(MARKER_FILENAME)
    }

    pub fn run_log(&self) -> PathBuf {
        self.logs_dir().join(RUN_LOG_FILENAME)
    }

    pub fn app_log(&self) -> PathBuf {
        self.logs_dir().join(APP_LOG_FILENAME)
    }

    pub fn paths(&self) -> MonitorPaths {
        MonitorPaths {
            app_dir: self.monitor.app_dir.clone(),
            app_log_path: self.app_log(),
            run_log_path: self.run_log(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backup.executable, "restic");
        assert_eq!(config.schedule.min_idle_seconds, 300);
        assert_eq!(config.schedule.pause_hours, 8);
        assert!(!config.schedule.ignore_exit_code_3);
        assert_eq!(config.idle.unit, IdleUnit::Millis);
        assert!(!config.api.enabled);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            [backup]
            executable = "/usr/bin/restic"
            args = ["backup", "/home"]

            [schedule]
            min_idle_seconds = 600
            ignore_exit_code_3 = true
            "#,
        )
        .unwrap();

        assert_eq!(config.backup.executable, "/usr/bin/restic");
        assert_eq!(config.backup.args, vec!["backup", "/home"]);
        assert_eq!(config.schedule.min_idle_seconds, 600);
        assert!(config.schedule.ignore_exit_code_3);
        assert_eq!(config.schedule.min_seconds_between_backups, 3600);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_empty_executable_rejected() {
        let result = Config::from_toml("[backup]\nexecutable = \"  \"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[schedule]\nmin_idle_seconds = 42\n[api]\nenabled = true\nport = 8123\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.schedule.min_idle_seconds, 42);
        assert!(config.api.enabled);
        assert_eq!(config.api.port, 8123);
    }

    #[test]
    fn test_backup_environment_merges_file_and_inline() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("env.json"),
            r#"{"RESTIC_REPOSITORY": "/srv/repo", "RESTIC_PASSWORD": "from-file"}"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.monitor.app_dir = dir.path().to_path_buf();
        config.backup.env_file = Some(PathBuf::from("env.json"));
        config
            .backup
            .env
            .insert("RESTIC_PASSWORD".to_string(), "inline".to_string());

        let env = config.backup_environment().unwrap();
        assert_eq!(env["RESTIC_REPOSITORY"], "/srv/repo");
        assert_eq!(env["RESTIC_PASSWORD"], "inline");
    }

    #[test]
    fn test_missing_env_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.monitor.app_dir = dir.path().to_path_buf();
        config.backup.env_file = Some(PathBuf::from("missing.json"));

        assert!(matches!(
            config.backup_environment(),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_pause_hours_bounds() {
        let mut config = Config::default();
        config.schedule.pause_hours = 0;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        config.schedule.pause_hours = 10_000_000_000;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        config.schedule.pause_hours = MAX_PAUSE_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let mut config = Config::default();
        config.monitor.app_dir = PathBuf::from("/data/bm");
        assert_eq!(config.pause_file(), PathBuf::from("/data/bm/pause_until.txt"));
        assert_eq!(config.run_log(), PathBuf::from("/data/bm/logs/restic-last.log"));
        assert_eq!(
            config.marker_file(),
            PathBuf::from("/data/bm/restic-last-successful.marker")
        );
        assert_eq!(
            config.paths().app_log_path,
            PathBuf::from("/data/bm/logs/backup-monitor.log")
        );
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let rendered = Config::default().to_toml().unwrap();
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.schedule.min_idle_seconds, 300);
    }
}
