//! Relay server lifecycle.
//!
//! `Idle → Starting → Listening → Draining → Stopped`. Binding the listener
//! and writing the PID file are the only fatal steps; per-connection work
//! runs on tracked tasks and never brings the server down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::clipboard::ClipboardWriter;
use crate::connection::{handle_connection, RelayContext};
use crate::pidfile::{check_pid_file, remove_pid_file, write_pid_file, PidFileError, PidStatus};

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not started.
    Idle,
    /// Binding and writing the PID file.
    Starting,
    /// Accepting connections.
    Listening,
    /// Listener closed, waiting for in-flight handlers.
    Draining,
    /// Finished; the PID file has been removed.
    Stopped,
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("warpclipd is already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    PidFile(#[from] PidFileError),

    #[error("error accepting connection: {0}")]
    Accept(#[source] io::Error),

    #[error("server cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: ServerState,
    },
}

/// Loopback TCP relay feeding accepted connections to the clipboard.
pub struct RelayServer<W> {
    ctx: Arc<RelayContext<W>>,
    state: Arc<RwLock<ServerState>>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    tracker: TaskTracker,
}

impl<W: ClipboardWriter> RelayServer<W> {
    pub fn new(ctx: Arc<RelayContext<W>>) -> Self {
        Self {
            ctx,
            state: Arc::new(RwLock::new(ServerState::Idle)),
            listener: None,
            local_addr: None,
            tracker: TaskTracker::new(),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of handlers still running.
    pub fn active_connections(&self) -> usize {
        self.tracker.len()
    }

    pub fn context(&self) -> &Arc<RelayContext<W>> {
        &self.ctx
    }

    /// Bind the listener and claim the PID file.
    ///
    /// Refuses to start when the PID file names a live process. A stale or
    /// unreadable PID file is removed first.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        self.transition("start", ServerState::Idle, ServerState::Starting)
            .await?;

        match self.bind_and_claim().await {
            Ok(addr) => {
                *self.state.write().await = ServerState::Listening;
                Ok(addr)
            }
            Err(e) => {
                *self.state.write().await = ServerState::Stopped;
                Err(e)
            }
        }
    }

    async fn bind_and_claim(&mut self) -> Result<SocketAddr, ServerError> {
        let config = &self.ctx.config;
        let logger = &self.ctx.logger;

        match check_pid_file(&config.pid_file) {
            PidStatus::Running(pid) => return Err(ServerError::AlreadyRunning(pid)),
            PidStatus::Stale(pid) => {
                logger.info(format!("Removing stale PID file (PID {} is not running)", pid));
                remove_pid_file(&config.pid_file)?;
            }
            PidStatus::Invalid => {
                logger.warning(format!(
                    "Removing unreadable PID file {}",
                    config.pid_file.display()
                ));
                remove_pid_file(&config.pid_file)?;
            }
            PidStatus::Missing => {}
        }

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let pid = write_pid_file(&config.pid_file)?;

        logger.info(format!("Server listening on {} (PID {})", local, pid));
        info!(%local, pid, "relay listening");

        self.listener = Some(listener);
        self.local_addr = Some(local);
        Ok(local)
    }

    /// Accept connections until `shutdown` is cancelled, then drain.
    ///
    /// The PID file is removed on the way out whether the loop ended by
    /// cancellation or by a fatal accept error.
    pub async fn serve(&mut self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let state = self.state().await;
        let Some(listener) = self.listener.take() else {
            return Err(ServerError::InvalidState {
                action: "serve",
                state,
            });
        };

        let result = self.accept_loop(&listener, &shutdown).await;
        drop(listener);

        *self.state.write().await = ServerState::Draining;
        self.drain().await;

        if let Err(e) = remove_pid_file(&self.ctx.config.pid_file) {
            self.ctx
                .logger
                .error(format!("Failed to remove PID file: {}", e));
        }
        *self.state.write().await = ServerState::Stopped;
        self.ctx.logger.info("Server stopped");

        result
    }

    /// `start` followed by `serve`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ServerError> {
        self.start().await?;
        self.serve(shutdown).await
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        shutdown: &CancellationToken,
    ) -> Result<(), ServerError> {
        let logger = &self.ctx.logger;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    logger.info("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            logger.debug(format!("Accepted connection from {}", peer));
                            let ctx = Arc::clone(&self.ctx);
                            self.tracker.spawn(async move {
                                let peer = peer.to_string();
                                let outcome = handle_connection(stream, &peer, &ctx).await;
                                debug!(%peer, ?outcome, "connection finished");
                            });
                        }
                        Err(e) if !is_fatal_accept_error(&e) => {
                            logger.debug(format!("Connection aborted before accept: {}", e));
                        }
                        Err(e) => {
                            logger.error(format!("Error accepting connection: {}", e));
                            return Err(ServerError::Accept(e));
                        }
                    }
                }
            }
        }
    }

    async fn drain(&self) {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            self.ctx.logger.info(format!(
                "Waiting for {} in-flight connection(s) to finish",
                in_flight
            ));
        }
        self.tracker.wait().await;
    }

    async fn transition(
        &self,
        action: &'static str,
        from: ServerState,
        to: ServerState,
    ) -> Result<(), ServerError> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(ServerError::InvalidState {
                action,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }
}

/// Whether an accept error ends the accept loop.
fn is_fatal_accept_error(e: &io::Error) -> bool {
    // The peer gave up between SYN and accept; the listener is fine.
    e.kind() != io::ErrorKind::ConnectionAborted
}
