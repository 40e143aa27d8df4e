//! Leveled, dual-destination file logger for the relay.
//!
//! Records are written as `[YYYY-MM-DD HH:MM:SS] [LEVEL] message`. DEBUG
//! records go only to the debug file; every other level goes to the main
//! file, and ERROR records are echoed to the process error stream as well.
//! Each file rotates independently once it grows past the size threshold.
//!
//! Logging never fails from the caller's point of view: write problems are
//! reported on stderr and otherwise swallowed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warpclipd::logging::RelayLogger;
//!
//! let logger = RelayLogger::open("/tmp/warpclip.log").unwrap();
//! logger.info("Server listening on 127.0.0.1:8888");
//! logger.debug("only in /tmp/warpclip.debug.log");
//! logger.close();
//! ```

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::DEFAULT_LOG_ROTATE_SIZE;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Tag written into each record.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the debug log path: `.debug` goes before the extension, or is
/// appended when there is none.
///
/// `relay.log` becomes `relay.debug.log`; `relay` becomes `relay.debug`.
pub fn debug_log_path(path: &Path) -> PathBuf {
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => {
            let mut name = stem.to_os_string();
            name.push(".debug.");
            name.push(ext);
            path.with_file_name(name)
        }
        _ => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".debug");
            PathBuf::from(name)
        }
    }
}

/// Replace control characters (other than tab, newline and carriage return)
/// with `?` so a message cannot forge or corrupt log records.
pub fn sanitize(message: &str) -> String {
    message
        .chars()
        .map(|c| {
            if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
                '?'
            } else {
                c
            }
        })
        .collect()
}

/// One append-only destination that can be reopened and rotated.
struct LogFile {
    path: PathBuf,
    file: Option<File>,
}

impl LogFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Reopen the file if the handle was lost or the file was removed underneath us.
    fn ensure_open(&mut self) -> io::Result<()> {
        if self.file.is_none() || !self.path.exists() {
            self.file = Some(open_append(&self.path)?);
        }
        Ok(())
    }

    /// Rotate to `<path>.<YYYYmmddHHMMSS>` once the file exceeds `max_size`.
    fn rotate_if_needed(&mut self, max_size: u64) -> io::Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        if file.metadata()?.len() <= max_size {
            return Ok(());
        }

        if let Some(mut old) = self.file.take() {
            let _ = old.flush();
        }
        fs::rename(&self.path, self.rotated_path())?;

        self.file = Some(open_append(&self.path)?);
        Ok(())
    }

    /// `<path>.YYYYmmddHHMMSS`, with a `.N` counter when that name is taken
    /// by an earlier rotation in the same second.
    fn rotated_path(&self) -> PathBuf {
        let mut base = self.path.as_os_str().to_os_string();
        base.push(format!(".{}", chrono::Local::now().format("%Y%m%d%H%M%S")));

        let mut candidate = PathBuf::from(&base);
        let mut n = 1u32;
        while candidate.exists() {
            let mut name = base.clone();
            name.push(format!(".{}", n));
            candidate = PathBuf::from(name);
            n += 1;
        }
        candidate
    }

    fn write_line(&mut self, line: &str, max_size: u64) -> io::Result<()> {
        self.ensure_open()?;
        self.rotate_if_needed(max_size)?;
        match self.file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "log file is not open")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}

struct LoggerState {
    main: LogFile,
    debug: LogFile,
    error_stream: Box<dyn Write + Send>,
    closed: bool,
}

/// Thread-safe relay logger. All operations are serialized on one mutex.
pub struct RelayLogger {
    state: Mutex<LoggerState>,
    max_file_size: u64,
}

impl RelayLogger {
    /// Open `path` as the main log and the derived `.debug` sibling as the
    /// debug log.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Self::open_with_debug(path, debug_log_path(path))
    }

    /// Open explicit main and debug log files.
    pub fn open_with_debug(main: impl AsRef<Path>, debug: impl AsRef<Path>) -> io::Result<Self> {
        let main = LogFile::open(main.as_ref().to_path_buf())?;
        let debug = LogFile::open(debug.as_ref().to_path_buf())?;

        Ok(Self {
            state: Mutex::new(LoggerState {
                main,
                debug,
                error_stream: Box::new(io::stderr()),
                closed: false,
            }),
            max_file_size: DEFAULT_LOG_ROTATE_SIZE,
        })
    }

    /// Set the size above which files are rotated.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Replace the stream ERROR records are echoed to (stderr by default).
    pub fn with_error_stream(self, stream: impl Write + Send + 'static) -> Self {
        self.lock().error_stream = Box::new(stream);
        self
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }

    /// Write a record at `level`.
    pub fn log(&self, level: LogLevel, message: &str) {
        let message = sanitize(message);
        mirror_to_tracing(level, &message);

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{}] [{}] {}\n", timestamp, level, message);

        let mut state = self.lock();
        let LoggerState {
            main,
            debug,
            error_stream,
            closed,
        } = &mut *state;

        if !*closed {
            let target = if level == LogLevel::Debug { debug } else { main };
            if let Err(e) = target.write_line(&line, self.max_file_size) {
                eprintln!("Error writing to log {}: {}", target.path.display(), e);
            }
        }

        if level == LogLevel::Error {
            let _ = error_stream.write_all(line.as_bytes());
            let _ = error_stream.flush();
        }
    }

    /// Flush and close both files. Later calls are no-ops.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        if let Err(e) = state.main.close() {
            eprintln!("Error closing log file: {}", e);
        }
        if let Err(e) = state.debug.close() {
            eprintln!("Error closing debug log file: {}", e);
        }
    }

    /// Path of the main log file.
    pub fn main_path(&self) -> PathBuf {
        self.lock().main.path.clone()
    }

    /// Path of the debug log file.
    pub fn debug_path(&self) -> PathBuf {
        self.lock().debug.path.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LoggerState> {
        // A panic while holding the lock leaves the files usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for RelayLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayLogger")
            .field("max_file_size", &self.max_file_size)
            .finish_non_exhaustive()
    }
}

fn mirror_to_tracing(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(target: "warpclipd::relay", "{}", message),
        LogLevel::Info => tracing::info!(target: "warpclipd::relay", "{}", message),
        LogLevel::Warning => tracing::warn!(target: "warpclipd::relay", "{}", message),
        LogLevel::Error => tracing::error!(target: "warpclipd::relay", "{}", message),
    }
}

/// Open for append, creating with mode 0600 and tightening drifted permissions.
fn open_append(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = file.metadata()?.permissions();
        if permissions.mode() & 0o777 != 0o600 {
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
    }

    Ok(file)
}
