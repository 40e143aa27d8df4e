//! WarpClip Daemon
//!
//! Loopback relay from an SSH reverse tunnel to the local clipboard.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use warpclipd::control::DEFAULT_STOP_TIMEOUT;
use warpclipd::{
    daemon_status, stop_daemon, CommandClipboard, Config, RelayContext, RelayLogger, RelayServer,
    ServerError, StopOutcome,
};

const ENVIRONMENT_HELP: &str = "\
ENVIRONMENT VARIABLES:
  WARPCLIP_LOCAL_PORT         Override default port (8888)
  WARPCLIP_LOG_FILE           Override log file location
  WARPCLIP_DEBUG_FILE         Override debug log file location
  WARPCLIP_OUT_LOG            Override output log location
  WARPCLIP_ERROR_LOG          Override error log location
  WARPCLIP_PID_FILE           Override PID file location
  WARPCLIP_LAST_FILE          Override last-activity file location
  WARPCLIP_MAX_DATA_SIZE      Maximum payload in bytes (1024-104857600)
  WARPCLIP_CLIPBOARD_COMMAND  Clipboard command (default: pbcopy)

EXAMPLES:
  warpclipd start      # Start the daemon
  warpclipd status     # Check status
  warpclipd restart    # Restart the daemon

The daemon listens on 127.0.0.1:8888 and copies received data to the
clipboard. It is meant to be used with the warpclip command on remote
servers, reached through `ssh -R 9999:localhost:8888`.";

/// WarpClip Daemon - local clipboard service for remote machines.
#[derive(Parser, Debug)]
#[command(name = "warpclipd")]
#[command(version = concat!("v", env!("CARGO_PKG_VERSION")), about, long_about = None)]
#[command(disable_help_subcommand = true, after_long_help = ENVIRONMENT_HELP)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (default: start)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the clipboard daemon (default if no command specified)
    Start,

    /// Stop a running daemon
    Stop {
        /// Seconds to wait for the daemon to exit
        #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT.as_secs())]
        timeout: u64,
    },

    /// Restart the daemon
    Restart,

    /// Check daemon status
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show this help message
    Help,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Commands::Start);

    match command {
        Commands::Help => {
            Cli::command().print_long_help()?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Version => {
            println!("warpclipd v{}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // The running daemon logs diagnostics to its output log; one-shot commands to stderr.
    // The guard must outlive every log line, so exit by returning from `main`.
    let _guard = match command {
        Commands::Start | Commands::Restart => Some(init_file_tracing(&config.out_log_file, cli.verbose)?),
        _ => {
            init_stderr_tracing(cli.verbose);
            None
        }
    };

    let code = match command {
        Commands::Start => run_start(config).await?,
        Commands::Stop { timeout } => {
            run_stop(&config, Duration::from_secs(timeout), false).await?
        }
        Commands::Restart => match run_stop(&config, DEFAULT_STOP_TIMEOUT, true).await? {
            0 => run_start(config).await?,
            code => code,
        },
        Commands::Status { json } => {
            let report = daemon_status(&config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
            report.exit_code()
        }
        Commands::Help | Commands::Version => 0,
    };

    Ok(exit_code(code))
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn init_stderr_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}

fn init_file_tracing(path: &Path, verbose: bool) -> anyhow::Result<WorkerGuard> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("invalid output log path {}", path.display()))?;

    let (non_blocking, guard) = file_writer(dir, file_name);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    Ok(guard)
}

/// Non-blocking appender for the output log. Lines are flushed when the
/// guard drops.
fn file_writer(dir: &Path, file_name: impl AsRef<Path>) -> (NonBlocking, WorkerGuard) {
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    tracing_appender::non_blocking(file_appender)
}

/// Run the daemon in the foreground until SIGTERM or SIGINT.
async fn run_start(config: Config) -> anyhow::Result<i32> {
    let logger = RelayLogger::open_with_debug(&config.log_file, &config.debug_file)
        .with_context(|| format!("failed to open log file {}", config.log_file.display()))?
        .with_max_file_size(config.log_rotate_size);
    let logger = Arc::new(logger);

    logger.info(format!(
        "Starting warpclipd v{} (max data size {} bytes)",
        env!("CARGO_PKG_VERSION"),
        config.max_data_size
    ));

    let writer = CommandClipboard::from_config(&config)?;
    if !writer.is_available() {
        logger.warning(format!(
            "Clipboard command '{}' not found on PATH; copies will fail until it is installed",
            writer.program()
        ));
    }

    let mut signals = ShutdownSignals::register().context("failed to register signal handlers")?;

    let ctx = Arc::new(RelayContext::new(Arc::new(config), Arc::clone(&logger), writer));
    let mut server = RelayServer::new(ctx);

    match server.start().await {
        Ok(_) => {}
        Err(ServerError::AlreadyRunning(pid)) => {
            logger.error(format!("warpclipd is already running (PID {})", pid));
            eprintln!();
            eprintln!("To stop the existing daemon, run:");
            eprintln!("  warpclipd stop");
            logger.close();
            return Ok(1);
        }
        Err(e) => {
            logger.error(format!("Failed to start server: {}", e));
            logger.close();
            return Err(e.into());
        }
    }

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        signals.recv().await;
        token.cancel();
    });

    let result = server.serve(shutdown).await;
    logger.close();
    result?;
    Ok(0)
}

/// Stop the daemon. With `for_restart`, "not running" counts as success.
async fn run_stop(config: &Config, timeout: Duration, for_restart: bool) -> anyhow::Result<i32> {
    let outcome = stop_daemon(&config.pid_file, timeout).await?;

    match outcome {
        StopOutcome::Stopped(pid) => println!("Server stopped successfully (PID: {})", pid),
        StopOutcome::NotRunning => println!("Server is not running (no PID file found)"),
        StopOutcome::Stale(pid) => {
            println!("Server is not running (stale PID {}), removed PID file", pid)
        }
        StopOutcome::StillRunning(pid) => {
            eprintln!("Server may still be running (PID: {})", pid);
            eprintln!("Consider using 'kill -9 {}' if needed", pid);
        }
    }

    if for_restart && !matches!(outcome, StopOutcome::StillRunning(_)) {
        return Ok(0);
    }
    Ok(outcome.exit_code())
}

/// SIGTERM and SIGINT listeners, registered before the server starts.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }
}
