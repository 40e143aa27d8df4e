//! Configuration management for the WarpClip daemon.
//!
//! Configuration comes from built-in defaults and `WARPCLIP_*` environment
//! variables. It is resolved once at startup, validated eagerly and never
//! mutated afterwards; an invalid value aborts startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default port the daemon listens on.
pub const DEFAULT_PORT: u16 = 8888;

/// The only address the daemon will ever bind to.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Lowest accepted listen port (no privileged ports).
pub const MIN_PORT: u16 = 1024;

/// Default maximum payload size (1 MiB).
pub const DEFAULT_MAX_DATA_SIZE: u64 = 1024 * 1024;

/// Smallest accepted maximum payload size (1 KiB).
pub const MIN_DATA_SIZE: u64 = 1024;

/// Largest accepted maximum payload size (100 MiB).
pub const MAX_DATA_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

/// Default external command used to set the clipboard.
pub const DEFAULT_CLIPBOARD_COMMAND: &str = "pbcopy";

/// Default log rotation threshold (10 MiB).
pub const DEFAULT_LOG_ROTATE_SIZE: u64 = 10 * 1024 * 1024;

pub const ENV_PORT: &str = "WARPCLIP_LOCAL_PORT";
pub const ENV_LOG_FILE: &str = "WARPCLIP_LOG_FILE";
pub const ENV_DEBUG_FILE: &str = "WARPCLIP_DEBUG_FILE";
pub const ENV_OUT_LOG: &str = "WARPCLIP_OUT_LOG";
pub const ENV_ERROR_LOG: &str = "WARPCLIP_ERROR_LOG";
pub const ENV_PID_FILE: &str = "WARPCLIP_PID_FILE";
pub const ENV_LAST_FILE: &str = "WARPCLIP_LAST_FILE";
pub const ENV_MAX_DATA_SIZE: &str = "WARPCLIP_MAX_DATA_SIZE";
pub const ENV_CLIPBOARD_COMMAND: &str = "WARPCLIP_CLIPBOARD_COMMAND";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to determine the user home directory")]
    NoHomeDir,

    #[error("invalid port: WARPCLIP_LOCAL_PORT must be an integer between 1024 and 65535, got {0:?}")]
    InvalidPort(String),

    #[error("invalid size: WARPCLIP_MAX_DATA_SIZE must be an integer between 1024 and 104857600, got {0:?}")]
    InvalidSize(String),

    #[error("port must be between 1024 and 65535, got {0}")]
    PortOutOfRange(u16),

    #[error("bind address must be 127.0.0.1 for security, got {0}")]
    NonLoopbackBind(String),

    #[error("maximum data size must be between 1024 and 104857600 bytes, got {0}")]
    MaxSizeOutOfRange(u64),

    #[error("clipboard command must not be empty")]
    EmptyClipboardCommand,

    #[error("failed to create directory for {}: {}", .path.display(), .reason)]
    CreateDir { path: PathBuf, reason: String },
}

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port to listen on.
    pub port: u16,

    /// Bind address. Always the loopback literal.
    pub bind_address: String,

    /// Main log file.
    pub log_file: PathBuf,

    /// Debug log file.
    pub debug_file: PathBuf,

    /// File receiving the process diagnostic stream while running.
    pub out_log_file: PathBuf,

    /// File a service supervisor redirects stderr to.
    pub error_log_file: PathBuf,

    /// PID file.
    pub pid_file: PathBuf,

    /// Last-activity status file.
    pub last_file: PathBuf,

    /// Maximum payload size in bytes; longer payloads are truncated.
    pub max_data_size: u64,

    /// Clipboard setter program followed by its arguments.
    pub clipboard_command: Vec<String>,

    /// Read deadline for a connection, measured from accept.
    pub read_timeout: Duration,

    /// Deadline for a single clipboard command run.
    pub clipboard_timeout: Duration,

    /// Total clipboard attempts per payload.
    pub clipboard_attempts: u32,

    /// Base delay between clipboard attempts, multiplied by the attempt index.
    pub retry_delay: Duration,

    /// Size above which a log file is rotated.
    pub log_rotate_size: u64,
}

impl Config {
    /// Built-in defaults with all files under `home`.
    pub fn defaults(home: &Path) -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: LOOPBACK_ADDRESS.to_string(),
            log_file: home.join(".warpclip.log"),
            debug_file: home.join(".warpclip.debug.log"),
            out_log_file: home.join(".warpclip.out.log"),
            error_log_file: home.join(".warpclip.error.log"),
            pid_file: home.join(".warpclip.pid"),
            last_file: home.join(".warpclip.last"),
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            clipboard_command: vec![DEFAULT_CLIPBOARD_COMMAND.to_string()],
            read_timeout: Duration::from_secs(5),
            clipboard_timeout: Duration::from_secs(5),
            clipboard_attempts: 3,
            retry_delay: Duration::from_millis(100),
            log_rotate_size: DEFAULT_LOG_ROTATE_SIZE,
        }
    }

    /// Load configuration from the process environment.
    ///
    /// Creates the parent directory of every configured file as a side effect.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Self::resolve(&home, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from defaults rooted at `home` plus the variables
    /// returned by `lookup`, then validate it and create missing directories.
    pub fn resolve<F>(home: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::defaults(home);
        config.apply_overrides(home, lookup)?;
        config.validate()?;
        config.ensure_directories()?;
        Ok(config)
    }

    /// Apply environment overrides. Unset and empty variables are ignored.
    fn apply_overrides<F>(&mut self, home: &Path, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(port) = get(ENV_PORT) {
            let parsed: u16 = port
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
            if parsed < MIN_PORT {
                return Err(ConfigError::InvalidPort(port));
            }
            tracing::debug!("Overriding port from environment: {}", parsed);
            self.port = parsed;
        }

        let path_overrides: [(&str, &mut PathBuf); 6] = [
            (ENV_LOG_FILE, &mut self.log_file),
            (ENV_DEBUG_FILE, &mut self.debug_file),
            (ENV_OUT_LOG, &mut self.out_log_file),
            (ENV_ERROR_LOG, &mut self.error_log_file),
            (ENV_PID_FILE, &mut self.pid_file),
            (ENV_LAST_FILE, &mut self.last_file),
        ];
        for (key, slot) in path_overrides {
            if let Some(value) = get(key) {
                *slot = expand_path(&value, home);
                tracing::debug!("Overriding {} from environment: {:?}", key, slot);
            }
        }

        if let Some(size) = get(ENV_MAX_DATA_SIZE) {
            let parsed: u64 = size
                .parse()
                .map_err(|_| ConfigError::InvalidSize(size.clone()))?;
            if !(MIN_DATA_SIZE..=MAX_DATA_SIZE_LIMIT).contains(&parsed) {
                return Err(ConfigError::InvalidSize(size));
            }
            self.max_data_size = parsed;
        }

        if let Some(command) = get(ENV_CLIPBOARD_COMMAND) {
            self.clipboard_command = command.split_whitespace().map(str::to_string).collect();
        }

        Ok(())
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < MIN_PORT {
            return Err(ConfigError::PortOutOfRange(self.port));
        }

        // Never anything but loopback: the relay has no authentication.
        if self.bind_address != LOOPBACK_ADDRESS {
            return Err(ConfigError::NonLoopbackBind(self.bind_address.clone()));
        }

        if !(MIN_DATA_SIZE..=MAX_DATA_SIZE_LIMIT).contains(&self.max_data_size) {
            return Err(ConfigError::MaxSizeOutOfRange(self.max_data_size));
        }

        if self.clipboard_command.is_empty() {
            return Err(ConfigError::EmptyClipboardCommand);
        }

        Ok(())
    }

    /// Create the parent directory of every configured file with mode 0700.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for path in self.file_paths() {
            let Some(dir) = path.parent() else {
                continue;
            };
            if dir.as_os_str().is_empty() || dir.exists() {
                continue;
            }
            create_private_dir(dir).map_err(|e| ConfigError::CreateDir {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// All file paths managed by the daemon.
    pub fn file_paths(&self) -> [&Path; 6] {
        [
            &self.log_file,
            &self.debug_file,
            &self.out_log_file,
            &self.error_log_file,
            &self.pid_file,
            &self.last_file,
        ]
    }

    /// `address:port` string the daemon listens on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Maximum payload size as a buffer length.
    pub fn max_payload_len(&self) -> usize {
        usize::try_from(self.max_data_size).unwrap_or(usize::MAX)
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_path(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn resolve_with(home: &Path, vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(home, |key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = resolve_with(temp_dir.path(), &[]).unwrap();

        assert_eq!(config.port, 8888);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.max_data_size, 1048576);
        assert_eq!(config.log_file, temp_dir.path().join(".warpclip.log"));
        assert_eq!(config.debug_file, temp_dir.path().join(".warpclip.debug.log"));
        assert_eq!(config.pid_file, temp_dir.path().join(".warpclip.pid"));
        assert_eq!(config.last_file, temp_dir.path().join(".warpclip.last"));
        assert_eq!(config.clipboard_command, vec!["pbcopy".to_string()]);
        assert_eq!(config.clipboard_attempts, 3);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.listen_addr(), "127.0.0.1:8888");
    }

    #[test]
    fn test_port_override() {
        let temp_dir = TempDir::new().unwrap();
        let config = resolve_with(temp_dir.path(), &[(ENV_PORT, "9000")]).unwrap();
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_port_override_boundaries() {
        let temp_dir = TempDir::new().unwrap();
        assert!(resolve_with(temp_dir.path(), &[(ENV_PORT, "1024")]).is_ok());
        assert!(resolve_with(temp_dir.path(), &[(ENV_PORT, "65535")]).is_ok());
        assert_eq!(
            resolve_with(temp_dir.path(), &[(ENV_PORT, "1023")]),
            Err(ConfigError::InvalidPort("1023".to_string()))
        );
        assert_eq!(
            resolve_with(temp_dir.path(), &[(ENV_PORT, "65536")]),
            Err(ConfigError::InvalidPort("65536".to_string()))
        );
    }

    #[test]
    fn test_port_override_not_a_number() {
        let temp_dir = TempDir::new().unwrap();
        let err = resolve_with(temp_dir.path(), &[(ENV_PORT, "eighty")]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidPort("eighty".to_string()));
        assert!(err.to_string().contains("invalid port"));
    }

    #[test]
    fn test_max_size_override() {
        let temp_dir = TempDir::new().unwrap();
        let config = resolve_with(temp_dir.path(), &[(ENV_MAX_DATA_SIZE, "2048")]).unwrap();
        assert_eq!(config.max_data_size, 2048);
        assert_eq!(config.max_payload_len(), 2048);
    }

    #[test]
    fn test_max_size_override_out_of_range() {
        let temp_dir = TempDir::new().unwrap();
        for value in ["1023", "104857601", "-5", "lots"] {
            let err = resolve_with(temp_dir.path(), &[(ENV_MAX_DATA_SIZE, value)]).unwrap_err();
            assert_eq!(err, ConfigError::InvalidSize(value.to_string()));
            assert!(err.to_string().contains("invalid size"));
        }
    }

    #[test]
    fn test_path_overrides_expand_home() {
        let temp_dir = TempDir::new().unwrap();
        let config = resolve_with(
            temp_dir.path(),
            &[
                (ENV_LOG_FILE, "~/logs/relay.log"),
                (ENV_PID_FILE, "~/run/relay.pid"),
                (ENV_LAST_FILE, "~/state/last"),
            ],
        )
        .unwrap();

        assert_eq!(config.log_file, temp_dir.path().join("logs/relay.log"));
        assert_eq!(config.pid_file, temp_dir.path().join("run/relay.pid"));
        assert_eq!(config.last_file, temp_dir.path().join("state/last"));
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let config = resolve_with(temp_dir.path(), &[(ENV_PORT, ""), (ENV_LOG_FILE, "  ")]).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.log_file, temp_dir.path().join(".warpclip.log"));
    }

    #[test]
    fn test_clipboard_command_override() {
        let temp_dir = TempDir::new().unwrap();
        let config = resolve_with(
            temp_dir.path(),
            &[(ENV_CLIPBOARD_COMMAND, "xclip -selection clipboard")],
        )
        .unwrap();
        assert_eq!(config.clipboard_command, vec!["xclip", "-selection", "clipboard"]);
    }

    #[test]
    fn test_expand_path() {
        let home = Path::new("/home/user");
        assert_eq!(expand_path("~/a/b", home), PathBuf::from("/home/user/a/b"));
        assert_eq!(expand_path("/abs/path", home), PathBuf::from("/abs/path"));
        assert_eq!(expand_path("relative", home), PathBuf::from("relative"));
        assert_eq!(expand_path("~user/x", home), PathBuf::from("~user/x"));
    }

    #[test]
    fn test_validate_rejects_non_loopback() {
        let mut config = Config::defaults(Path::new("/tmp"));
        config.bind_address = "0.0.0.0".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonLoopbackBind("0.0.0.0".to_string()))
        );

        config.bind_address = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_port_and_size() {
        let mut config = Config::defaults(Path::new("/tmp"));
        config.port = 80;
        assert_eq!(config.validate(), Err(ConfigError::PortOutOfRange(80)));

        let mut config = Config::defaults(Path::new("/tmp"));
        config.max_data_size = 512;
        assert_eq!(config.validate(), Err(ConfigError::MaxSizeOutOfRange(512)));
    }

    #[test]
    fn test_validate_empty_clipboard_command() {
        let mut config = Config::defaults(Path::new("/tmp"));
        config.clipboard_command.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyClipboardCommand));
    }

    #[test]
    #[cfg(unix)]
    fn test_creates_missing_directories_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let config =
            resolve_with(temp_dir.path(), &[(ENV_LOG_FILE, "~/nested/dir/relay.log")]).unwrap();

        let dir = config.log_file.parent().unwrap();
        assert!(dir.is_dir());
        let mode = fs::metadata(dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    #[serial]
    fn test_load_from_process_environment() {
        let temp_dir = TempDir::new().unwrap();
        let original_home = std::env::var("HOME").ok();
        std::env::set_var("HOME", temp_dir.path());
        std::env::set_var(ENV_PORT, "9123");

        let config = Config::load().unwrap();
        assert_eq!(config.port, 9123);
        assert_eq!(config.pid_file, temp_dir.path().join(".warpclip.pid"));

        std::env::remove_var(ENV_PORT);
        match original_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    #[serial]
    fn test_load_invalid_port_from_environment() {
        std::env::set_var(ENV_PORT, "not-a-port");

        let result = Config::load();
        assert!(matches!(result, Err(ConfigError::InvalidPort(_))));

        std::env::remove_var(ENV_PORT);
    }
}
