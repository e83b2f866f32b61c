//! Relaunching the monitor after a restart request.
//!
//! The new instance is started with the same executable and arguments,
//! detached from this process, and this process then exits.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{error, info};

/// Command that starts a fresh copy of this process
pub fn relaunch_command(exe: PathBuf, args: Vec<String>) -> Command {
    let mut command = Command::new(exe);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    command
}

/// Start a detached copy of the current executable with the current arguments
pub fn relaunch() -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    info!("Relaunching {} {:?}", exe.display(), args);
    match relaunch_command(exe, args).spawn() {
        Ok(child) => {
            info!(pid = child.id(), "New monitor instance started");
            Ok(())
        }
        Err(e) => {
            error!("Failed to relaunch monitor: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_relaunch_command_keeps_arguments() {
        let command = relaunch_command(
            PathBuf::from("/usr/local/bin/backup-monitor"),
            vec!["--config".to_string(), "/etc/monitor.toml".to_string()],
        );

        assert_eq!(command.get_program(), OsStr::new("/usr/local/bin/backup-monitor"));
        let args: Vec<&OsStr> = command.get_args().collect();
        assert_eq!(args, vec![OsStr::new("--config"), OsStr::new("/etc/monitor.toml")]);
    }
}
