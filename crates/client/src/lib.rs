//! # WarpClip Client Library
//!
//! Sends a payload through the SSH-forwarded port to the local `warpclipd`.
//!
//! The wire protocol is the connection itself: connect, write every byte,
//! close the write side. There is no framing and no acknowledgement.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warpclip::{send_payload, ClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sent = send_payload(b"hello", &ClientOptions::default()).await?;
//!     eprintln!("sent {} bytes", sent);
//!     Ok(())
//! }
//! ```

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Remote end of the reverse tunnel.
pub const DEFAULT_TUNNEL_PORT: u16 = 9999;

/// Port `warpclipd` listens on locally.
pub const DAEMON_PORT: u16 = 8888;

const TUNNEL_HOST: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no input provided")]
    NoInput,

    #[error("failed to read input: {0}")]
    Input(#[source] io::Error),

    #[error("SSH tunnel not detected on port {0}")]
    TunnelNotDetected(u16),

    #[error("failed to connect to 127.0.0.1:{port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to write data: {0}")]
    Write(#[source] io::Error),

    #[error("timed out while {0}")]
    Timeout(&'static str),
}

/// Connection settings for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub port: u16,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::for_port(DEFAULT_TUNNEL_PORT)
    }
}

impl ClientOptions {
    pub fn for_port(port: u16) -> Self {
        Self {
            port,
            probe_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Read the whole input stream.
pub async fn read_input<R: AsyncRead + Unpin>(mut reader: R) -> Result<Vec<u8>, ClientError> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .await
        .map_err(ClientError::Input)?;
    Ok(data)
}

/// Whether something accepts connections on the tunnel port.
///
/// The probe closes without sending data, which the daemon treats as a
/// control connection.
pub async fn tunnel_available(port: u16, probe_timeout: Duration) -> bool {
    matches!(
        timeout(probe_timeout, TcpStream::connect((TUNNEL_HOST, port))).await,
        Ok(Ok(_))
    )
}

/// Send `data` through the tunnel. Returns the number of bytes written.
pub async fn send_payload(data: &[u8], options: &ClientOptions) -> Result<usize, ClientError> {
    if data.is_empty() {
        return Err(ClientError::NoInput);
    }

    if !tunnel_available(options.port, options.probe_timeout).await {
        return Err(ClientError::TunnelNotDetected(options.port));
    }

    let mut stream = timeout(
        options.connect_timeout,
        TcpStream::connect((TUNNEL_HOST, options.port)),
    )
    .await
    .map_err(|_| ClientError::Timeout("connecting"))?
    .map_err(|source| ClientError::Connect {
        port: options.port,
        source,
    })?;

    tracing::debug!(bytes = data.len(), port = options.port, "sending payload");

    timeout(options.write_timeout, async {
        stream.write_all(data).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| ClientError::Timeout("sending data"))?
    .map_err(ClientError::Write)?;

    Ok(data.len())
}

/// Diagnosis printed when the tunnel is missing.
pub fn tunnel_help(port: u16) -> String {
    format!(
        "Error: SSH tunnel not detected on port {port}.\n\
         Make sure you connected with SSH using the RemoteForward option:\n  \
         ssh -R {port}:localhost:{DAEMON_PORT} user@host\n\
         \n\
         Or add to your ~/.ssh/config:\n  \
         Host host\n      \
         RemoteForward {port} localhost:{DAEMON_PORT}"
    )
}

/// Usage examples printed when stdin is empty.
pub const NO_INPUT_HELP: &str = "\
Error: No input provided. Please provide content via stdin.
Examples:
  cat file.txt | warpclip
  echo 'text' | warpclip
  warpclip < file.txt";
