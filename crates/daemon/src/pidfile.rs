//! PID file utilities for daemon running detection.
//!
//! The daemon records its process id in a single-integer file at startup and
//! removes it on graceful shutdown. Readers (`status`, `stop`, a second
//! `start`) check whether the recorded process is still alive; a file naming
//! a dead process is stale and may be removed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use warpclipd::pidfile::{check_pid_file, PidStatus};
//!
//! match check_pid_file(Path::new("/home/me/.warpclip.pid")) {
//!     PidStatus::Running(pid) => println!("Daemon is already running with PID {}", pid),
//!     PidStatus::Stale(pid) => println!("Stale PID file for {}", pid),
//!     PidStatus::Missing | PidStatus::Invalid => println!("No daemon running"),
//! }
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// Errors from PID file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("PID file {} not found", .0.display())]
    NotFound(PathBuf),

    #[error("PID file {} does not contain a valid PID: {:?}", .path.display(), .content)]
    Invalid { path: PathBuf, content: String },

    #[error("failed to write PID file {}: {}", .path.display(), .source)]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to access PID file {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: Errno,
    },
}

/// What the PID file says about the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidStatus {
    /// No PID file.
    Missing,
    /// The recorded process is alive.
    Running(u32),
    /// The recorded process is gone.
    Stale(u32),
    /// The file exists but does not hold a usable PID.
    Invalid,
}

impl PidStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, PidStatus::Running(_))
    }
}

/// Write the current process id to `path`.
///
/// The PID is first written to `<path>.<pid>.tmp` with mode 0600 and then
/// renamed over `path`, so readers never observe a partial file.
pub fn write_pid_file(path: &Path) -> Result<u32, PidFileError> {
    let pid = std::process::id();
    write_pid(path, pid)?;
    Ok(pid)
}

fn write_pid(path: &Path, pid: u32) -> Result<(), PidFileError> {
    let write_err = |source| PidFileError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(format!(".{}.tmp", pid));
    let temp_path = PathBuf::from(temp_name);

    let result = (|| {
        let mut file = create_private(&temp_path)?;
        writeln!(file, "{}", pid)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(write_err(e));
    }
    Ok(())
}

/// Read the PID recorded in `path`.
pub fn read_pid_file(path: &Path) -> Result<u32, PidFileError> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PidFileError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(PidFileError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(PidFileError::Invalid {
            path: path.to_path_buf(),
            content: content.trim().to_string(),
        }),
    }
}

/// Check if a process with the given PID is running.
///
/// Uses `kill(pid, 0)`. A permission error still means the process exists.
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Classify the PID file at `path` without modifying it.
pub fn check_pid_file(path: &Path) -> PidStatus {
    match read_pid_file(path) {
        Ok(pid) if is_process_running(pid) => PidStatus::Running(pid),
        Ok(pid) => PidStatus::Stale(pid),
        Err(PidFileError::NotFound(_)) => PidStatus::Missing,
        Err(_) => PidStatus::Invalid,
    }
}

/// Remove the PID file. A missing file is not an error.
pub fn remove_pid_file(path: &Path) -> Result<(), PidFileError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PidFileError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Ask the process to terminate with SIGTERM.
pub fn terminate(pid: u32) -> Result<(), PidFileError> {
    let raw = i32::try_from(pid).map_err(|_| PidFileError::Signal {
        pid,
        source: Errno::ESRCH,
    })?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|source| PidFileError::Signal { pid, source })
}

fn create_private(path: &Path) -> io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warpclip.pid");

        let pid = write_pid_file(&path).unwrap();
        assert_eq!(pid, std::process::id());
        assert_eq!(read_pid_file(&path).unwrap(), pid);
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{}\n", pid));

        // No temporary file left behind.
        let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_pid_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warpclip.pid");
        write_pid_file(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_write_pid_file_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warpclip.pid");
        fs::write(&path, "12345\n").unwrap();

        write_pid_file(&path).unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), std::process::id());
    }

    #[test]
    fn test_write_pid_file_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("no-such-dir").join("warpclip.pid");

        let err = write_pid_file(&path).unwrap_err();
        assert!(matches!(err, PidFileError::Write { .. }));
    }

    #[test]
    fn test_read_pid_file_invalid_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warpclip.pid");

        for content in ["", "abc", "-5", "0", "12 34"] {
            fs::write(&path, content).unwrap();
            assert!(
                matches!(read_pid_file(&path), Err(PidFileError::Invalid { .. })),
                "content {:?} should be invalid",
                content
            );
        }
    }

    #[test]
    fn test_is_process_running_current() {
        // Current process should be running
        assert!(
            is_process_running(std::process::id()),
            "Current process should be detected as running"
        );
    }

    #[test]
    fn test_is_process_running_invalid() {
        assert!(!is_process_running(0));
        assert!(!is_process_running(4_000_000_000));
        assert!(!is_process_running(u32::MAX));
    }

    #[test]
    fn test_is_process_running_init() {
        // PID 1 exists on every Unix system even when we cannot signal it.
        assert!(is_process_running(1), "PID 1 should always be running");
    }

    #[test]
    fn test_check_pid_file_states() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warpclip.pid");

        assert_eq!(check_pid_file(&path), PidStatus::Missing);

        write_pid_file(&path).unwrap();
        assert_eq!(
            check_pid_file(&path),
            PidStatus::Running(std::process::id())
        );

        // i32::MAX is above every kernel pid_max.
        fs::write(&path, format!("{}\n", i32::MAX)).unwrap();
        assert_eq!(check_pid_file(&path), PidStatus::Stale(i32::MAX as u32));

        fs::write(&path, "garbage").unwrap();
        assert_eq!(check_pid_file(&path), PidStatus::Invalid);

        // Checking never modifies the file.
        assert!(path.exists());
    }

    #[test]
    fn test_remove_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warpclip.pid");

        write_pid_file(&path).unwrap();
        remove_pid_file(&path).unwrap();
        assert!(!path.exists());

        // Removing a missing file should not fail.
        remove_pid_file(&path).unwrap();
    }

    #[test]
    fn test_terminate_dead_process() {
        let err = terminate(i32::MAX as u32).unwrap_err();
        assert!(matches!(err, PidFileError::Signal { .. }));
    }
}
