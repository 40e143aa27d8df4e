//! Last-activity record: size and time of the most recent successful copy.
//!
//! The file holds two lines, `{n} bytes copied` and a local timestamp. Each
//! update rewrites it through a temporary file and a rename so concurrent
//! readers see either the old or the new record.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Timestamp format shared with the log records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Distinguishes temp files of concurrent writers within one process.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Parsed contents of the last-activity file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastActivity {
    pub bytes: usize,
    pub timestamp: String,
}

/// Record a copy of `bytes` bytes at the current local time.
pub fn write_last_activity(path: &Path, bytes: usize) -> io::Result<()> {
    let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    write_record(path, bytes, &timestamp)
}

fn write_record(path: &Path, bytes: usize, timestamp: &str) -> io::Result<()> {
    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let temp_path = PathBuf::from(temp_name);

    let result = (|| {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp_path)?;
        write!(file, "{} bytes copied\n{}\n", bytes, timestamp)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Read the last-activity file. `Ok(None)` when no copy has been recorded.
pub fn read_last_activity(path: &Path) -> io::Result<Option<LastActivity>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut lines = content.lines();
    let bytes = lines
        .next()
        .and_then(|line| line.strip_suffix(" bytes copied"))
        .and_then(|n| n.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed last-activity file {}", path.display()),
            )
        })?;
    let timestamp = lines.next().unwrap_or_default().trim().to_string();

    Ok(Some(LastActivity { bytes, timestamp }))
}
