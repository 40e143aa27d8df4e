//! # WarpClip Daemon Library
//!
//! This crate provides the local half of WarpClip: a daemon that listens on
//! a loopback port, reached from a remote machine through an SSH reverse
//! tunnel, and copies whatever arrives on each connection to the system
//! clipboard.
//!
//! ## Overview
//!
//! - **Relay server**: accepts connections and runs one handler per connection
//! - **Connection classifier**: ignores empty tunnel control connections
//! - **Clipboard sink**: pipes payloads into `pbcopy` (or another command) with timeout and retries
//! - **Relay logger**: leveled main/debug log files with rotation
//! - **State files**: PID file and last-activity record used by `status` and `stop`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RelayServer                           │
//! │   accept loop ──► handler task per connection (TaskTracker)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  RelayContext                                                │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │   Config   │  │ RelayLogger  │  │ ClipboardSink<W>     │  │
//! │  └────────────┘  └──────────────┘  └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use warpclipd::{CommandClipboard, Config, RelayContext, RelayLogger, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::load()?);
//!     let logger = Arc::new(RelayLogger::open(&config.log_file)?);
//!     let writer = CommandClipboard::from_config(&config)?;
//!
//!     let ctx = Arc::new(RelayContext::new(config, logger, writer));
//!     let mut server = RelayServer::new(ctx);
//!
//!     let shutdown = CancellationToken::new();
//!     server.run(shutdown).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Defaults, environment overrides and validation
//! - [`logging`]: The relay's file logger
//! - [`clipboard`]: Clipboard writers and the retrying sink
//! - [`connection`]: Per-connection classification and reading
//! - [`server`]: Listener lifecycle and handler tracking
//! - [`pidfile`]: PID file and process liveness
//! - [`activity`]: Last-activity record
//! - [`control`]: `stop` and `status` against a running daemon

pub mod activity;
pub mod clipboard;
pub mod config;
pub mod connection;
pub mod control;
pub mod logging;
pub mod pidfile;
pub mod server;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export logging types for convenience
pub use logging::{LogLevel, RelayLogger};

// Re-export clipboard types for convenience
pub use clipboard::{ClipboardError, ClipboardSink, ClipboardWriter, CommandClipboard, MemoryClipboard};

// Re-export server types for convenience
pub use connection::{handle_connection, ConnectionOutcome, RelayContext};
pub use server::{RelayServer, ServerError, ServerState};

// Re-export control types for convenience
pub use control::{daemon_status, stop_daemon, ControlError, StatusReport, StopOutcome};
pub use pidfile::{PidFileError, PidStatus};
