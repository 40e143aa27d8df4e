//! Out-of-process control of a running daemon: `stop` and `status`.
//!
//! Both work purely from the PID file and the last-activity file; there is
//! no control channel to the daemon itself.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::activity::{read_last_activity, LastActivity};
use crate::config::Config;
use crate::pidfile::{
    check_pid_file, is_process_running, remove_pid_file, terminate, PidFileError, PidStatus,
};

/// Interval between liveness checks while waiting for the daemon to exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default time to wait for the daemon to exit after SIGTERM.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    PidFile(#[from] PidFileError),
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The daemon exited.
    Stopped(u32),
    /// There was no PID file, or it was unreadable and has been removed.
    NotRunning,
    /// The PID file named a dead process and has been removed.
    Stale(u32),
    /// The daemon was signalled but is still alive after the timeout.
    StillRunning(u32),
}

impl StopOutcome {
    /// Process exit code for the `stop` subcommand.
    pub fn exit_code(&self) -> i32 {
        match self {
            StopOutcome::Stopped(_) => 0,
            StopOutcome::NotRunning | StopOutcome::Stale(_) => 3,
            StopOutcome::StillRunning(_) => 1,
        }
    }
}

/// Send SIGTERM to the daemon recorded in `pid_file` and wait up to
/// `timeout` for it to exit.
pub async fn stop_daemon(pid_file: &Path, timeout: Duration) -> Result<StopOutcome, ControlError> {
    let pid = match check_pid_file(pid_file) {
        PidStatus::Missing => return Ok(StopOutcome::NotRunning),
        PidStatus::Invalid => {
            remove_pid_file(pid_file)?;
            return Ok(StopOutcome::NotRunning);
        }
        PidStatus::Stale(pid) => {
            remove_pid_file(pid_file)?;
            return Ok(StopOutcome::Stale(pid));
        }
        PidStatus::Running(pid) => pid,
    };

    tracing::info!(pid, "sending SIGTERM");
    if let Err(e) = terminate(pid) {
        // It may have exited between the check and the signal.
        if is_process_running(pid) {
            return Err(e.into());
        }
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_process_running(pid) {
            // A graceful exit removes the file itself; clean up after a crash.
            remove_pid_file(pid_file)?;
            return Ok(StopOutcome::Stopped(pid));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(StopOutcome::StillRunning(pid));
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

/// Snapshot of the daemon's state, as printed by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub pid: Option<u32>,
    pub stale: bool,
    pub listen_addr: String,
    pub last_activity: Option<LastActivity>,
    pub log_file: PathBuf,
    pub debug_file: PathBuf,
    pub out_log_file: PathBuf,
    pub error_log_file: PathBuf,
}

impl StatusReport {
    /// Process exit code for the `status` subcommand.
    pub fn exit_code(&self) -> i32 {
        if self.running {
            0
        } else {
            3
        }
    }
}

/// Inspect the PID and last-activity files. Nothing is modified.
pub fn daemon_status(config: &Config) -> StatusReport {
    let (running, pid, stale) = match check_pid_file(&config.pid_file) {
        PidStatus::Running(pid) => (true, Some(pid), false),
        PidStatus::Stale(pid) => (false, Some(pid), true),
        PidStatus::Invalid => (false, None, true),
        PidStatus::Missing => (false, None, false),
    };

    let last_activity = match read_last_activity(&config.last_file) {
        Ok(activity) => activity,
        Err(e) => {
            tracing::warn!("Could not read {}: {}", config.last_file.display(), e);
            None
        }
    };

    StatusReport {
        running,
        pid,
        stale,
        listen_addr: config.listen_addr(),
        last_activity,
        log_file: config.log_file.clone(),
        debug_file: config.debug_file.clone(),
        out_log_file: config.out_log_file.clone(),
        error_log_file: config.error_log_file.clone(),
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.running, self.pid, self.stale) {
            (true, Some(pid), _) => {
                writeln!(f, "Server status: Running (PID: {})", pid)?;
                writeln!(f, "Listening on: {}", self.listen_addr)?;
            }
            (false, Some(pid), true) => {
                writeln!(f, "Server status: Not running (stale PID {})", pid)?;
            }
            (false, None, true) => {
                writeln!(f, "Server status: Not running (invalid PID file)")?;
            }
            _ => writeln!(f, "Server status: Not running (no PID file found)")?,
        }

        if let Some(activity) = &self.last_activity {
            writeln!(f)?;
            writeln!(f, "Last clipboard activity:")?;
            writeln!(f, "{} bytes copied", activity.bytes)?;
            writeln!(f, "{}", activity.timestamp)?;
        }

        writeln!(f)?;
        writeln!(f, "Log file: {}", self.log_file.display())?;
        writeln!(f, "Debug log: {}", self.debug_file.display())?;
        writeln!(f, "Output log: {}", self.out_log_file.display())?;
        write!(f, "Error log: {}", self.error_log_file.display())
    }
}
