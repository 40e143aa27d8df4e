//! Clipboard sink: hands payloads to the system clipboard.
//!
//! The [`ClipboardWriter`] trait is the only seam that touches the operating
//! environment. [`CommandClipboard`] pipes bytes into an external program
//! such as `pbcopy`; [`MemoryClipboard`] records them in memory.
//! [`ClipboardSink`] wraps a writer with a per-attempt timeout and a
//! bounded retry loop.

use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::Config;
use crate::logging::RelayLogger;

/// Errors produced while setting the clipboard.
#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard command is empty")]
    EmptyCommand,

    #[error("failed to start clipboard command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to clipboard command: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("clipboard command exited with {status}{stderr}")]
    Exit { status: String, stderr: String },

    #[error("clipboard command timed out after {0:?}")]
    Timeout(Duration),

    #[error("clipboard write rejected: {0}")]
    Rejected(String),

    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ClipboardError>,
    },
}

/// Something that can replace the clipboard contents with a byte payload.
pub trait ClipboardWriter: Send + Sync + 'static {
    fn write(&self, data: Bytes) -> impl Future<Output = Result<(), ClipboardError>> + Send;
}

/// Writes the clipboard by piping the payload into an external program.
#[derive(Debug, Clone)]
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
}

impl CommandClipboard {
    /// Build from a program followed by its arguments.
    pub fn new(command: &[String]) -> Result<Self, ClipboardError> {
        let (program, args) = command.split_first().ok_or(ClipboardError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ClipboardError> {
        Self::new(&config.clipboard_command)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the program can be found on `PATH`.
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}

impl ClipboardWriter for CommandClipboard {
    async fn write(&self, data: Bytes) -> Result<(), ClipboardError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClipboardError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&data).await.map_err(ClipboardError::Stdin)?;
            stdin.shutdown().await.map_err(ClipboardError::Stdin)?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(ClipboardError::Stdin)?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(ClipboardError::Exit {
                status: output.status.to_string(),
                stderr: if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr)
                },
            })
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    payloads: Mutex<Vec<Bytes>>,
    attempts: AtomicU32,
    fail_remaining: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

/// In-memory clipboard that records every payload it accepts.
///
/// Clones share the same recording, so a test can keep one handle and give
/// another to the server.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    inner: Arc<MemoryInner>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` writes.
    pub fn failing_first(self, n: u32) -> Self {
        self.inner.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep for `delay` inside every write.
    pub fn with_delay(self, delay: Duration) -> Self {
        if let Ok(mut slot) = self.inner.delay.lock() {
            *slot = Some(delay);
        }
        self
    }

    /// Payloads accepted so far, in order.
    pub fn payloads(&self) -> Vec<Bytes> {
        self.inner
            .payloads
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Most recently accepted payload.
    pub fn last(&self) -> Option<Bytes> {
        self.payloads().last().cloned()
    }

    /// Number of write calls, successful or not.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

impl ClipboardWriter for MemoryClipboard {
    async fn write(&self, data: Bytes) -> Result<(), ClipboardError> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = self.inner.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = self
            .inner
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(ClipboardError::Rejected(format!("attempt {} refused", attempt)));
        }

        self.inner
            .payloads
            .lock()
            .map_err(|_| ClipboardError::Rejected("recording lock poisoned".to_string()))?
            .push(data);
        Ok(())
    }
}

/// Retrying, time-bounded front end to a [`ClipboardWriter`].
#[derive(Debug)]
pub struct ClipboardSink<W> {
    writer: W,
    timeout: Duration,
    attempts: u32,
    retry_delay: Duration,
}

impl<W: ClipboardWriter> ClipboardSink<W> {
    pub fn new(writer: W, timeout: Duration, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            writer,
            timeout,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Use the timeout, attempt budget and retry delay from `config`.
    pub fn from_config(writer: W, config: &Config) -> Self {
        Self::new(
            writer,
            config.clipboard_timeout,
            config.clipboard_attempts,
            config.retry_delay,
        )
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Copy `data` to the clipboard, retrying with a linearly growing delay.
    pub async fn copy(&self, data: Bytes, logger: &RelayLogger) -> Result<(), ClipboardError> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay * (attempt - 1)).await;
            }

            let result = match tokio::time::timeout(self.timeout, self.writer.write(data.clone()))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ClipboardError::Timeout(self.timeout)),
            };

            match result {
                Ok(()) => {
                    if attempt > 1 {
                        logger.debug(format!("Clipboard write succeeded on attempt {}", attempt));
                    }
                    return Ok(());
                }
                Err(e) => {
                    logger.warning(format!(
                        "Clipboard attempt {}/{} failed: {}",
                        attempt, self.attempts, e
                    ));
                    last_error = Some(e);
                }
            }
        }

        Err(ClipboardError::RetriesExhausted {
            attempts: self.attempts,
            last: Box::new(last_error.unwrap_or(ClipboardError::EmptyCommand)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn logger(dir: &TempDir) -> RelayLogger {
        RelayLogger::open(dir.path().join("relay.log")).unwrap()
    }

    fn sink(writer: MemoryClipboard) -> ClipboardSink<MemoryClipboard> {
        ClipboardSink::new(writer, Duration::from_secs(1), 3, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_copy_success() {
        let temp_dir = TempDir::new().unwrap();
        let logger = logger(&temp_dir);
        let clipboard = MemoryClipboard::new();
        let sink = sink(clipboard.clone());

        sink.copy(Bytes::from_static(b"hello"), &logger).await.unwrap();

        assert_eq!(clipboard.attempts(), 1);
        assert_eq!(clipboard.last().unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let temp_dir = TempDir::new().unwrap();
        let logger = logger(&temp_dir);
        let clipboard = MemoryClipboard::new().failing_first(2);
        let sink = sink(clipboard.clone());

        sink.copy(Bytes::from_static(b"data"), &logger).await.unwrap();
        logger.close();

        assert_eq!(clipboard.attempts(), 3);
        assert_eq!(clipboard.payloads().len(), 1);

        let log = std::fs::read_to_string(temp_dir.path().join("relay.log")).unwrap();
        assert!(log.contains("Clipboard attempt 1/3 failed"));
        assert!(log.contains("Clipboard attempt 2/3 failed"));
        assert!(!log.contains("attempt 3/3"));
    }

    #[tokio::test]
    async fn test_exactly_three_attempts() {
        let temp_dir = TempDir::new().unwrap();
        let logger = logger(&temp_dir);
        let clipboard = MemoryClipboard::new().failing_first(10);
        let sink = sink(clipboard.clone());

        let err = sink
            .copy(Bytes::from_static(b"data"), &logger)
            .await
            .unwrap_err();

        assert_eq!(clipboard.attempts(), 3);
        assert!(clipboard.payloads().is_empty());
        match &err {
            ClipboardError::RetriesExhausted { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**last, ClipboardError::Rejected(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().starts_with("failed after 3 attempts: "));
    }

    #[tokio::test]
    async fn test_retry_delay_grows() {
        let temp_dir = TempDir::new().unwrap();
        let logger = logger(&temp_dir);
        let clipboard = MemoryClipboard::new().failing_first(10);
        let sink = ClipboardSink::new(
            clipboard,
            Duration::from_secs(1),
            3,
            Duration::from_millis(50),
        );

        let started = std::time::Instant::now();
        let _ = sink.copy(Bytes::from_static(b"x"), &logger).await;

        // 50ms before attempt 2, 100ms before attempt 3.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let logger = logger(&temp_dir);
        let clipboard = MemoryClipboard::new().with_delay(Duration::from_millis(200));
        let sink = ClipboardSink::new(
            clipboard.clone(),
            Duration::from_millis(20),
            2,
            Duration::from_millis(1),
        );

        let err = sink
            .copy(Bytes::from_static(b"slow"), &logger)
            .await
            .unwrap_err();

        assert_eq!(clipboard.attempts(), 2);
        match err {
            ClipboardError::RetriesExhausted { last, .. } => {
                assert!(matches!(*last, ClipboardError::Timeout(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_command_clipboard_rejects_empty_command() {
        assert!(matches!(
            CommandClipboard::new(&[]),
            Err(ClipboardError::EmptyCommand)
        ));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_command_clipboard_pipes_stdin() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("clip.out");
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > {}", out.display()),
        ];
        let clipboard = CommandClipboard::new(&command).unwrap();

        clipboard.write(Bytes::from_static(b"piped bytes")).await.unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), b"piped bytes");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_command_clipboard_nonzero_exit() {
        let command = vec!["sh".to_string(), "-c".to_string(), "cat >/dev/null; echo nope >&2; exit 3".to_string()];
        let clipboard = CommandClipboard::new(&command).unwrap();

        let err = clipboard.write(Bytes::from_static(b"x")).await.unwrap_err();
        match err {
            ClipboardError::Exit { stderr, .. } => assert!(stderr.contains("nope")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_command_clipboard_killed_at_deadline() {
        let temp_dir = TempDir::new().unwrap();
        let logger = logger(&temp_dir);
        let marker = temp_dir.path().join("finished");
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat >/dev/null; sleep 1; touch {}", marker.display()),
        ];
        let sink = ClipboardSink::new(
            CommandClipboard::new(&command).unwrap(),
            Duration::from_millis(200),
            3,
            Duration::from_millis(1),
        );

        let err = sink
            .copy(Bytes::from_static(b"stuck"), &logger)
            .await
            .unwrap_err();

        match err {
            ClipboardError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ClipboardError::Timeout(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // A killed shell never reaches the `touch`.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_command_clipboard_missing_program() {
        let command = vec!["warpclip-definitely-not-a-program".to_string()];
        let clipboard = CommandClipboard::new(&command).unwrap();
        assert!(!clipboard.is_available());

        let err = clipboard.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, ClipboardError::Spawn { .. }));
    }
}
