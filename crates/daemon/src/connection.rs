//! Per-connection handling: classify, read, copy.
//!
//! A connection that closes before sending anything is a tunnel control
//! connection and is ignored. Anything else is read until end of stream or
//! the size cap, then handed to the clipboard sink.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::activity::write_last_activity;
use crate::clipboard::{ClipboardSink, ClipboardWriter};
use crate::config::Config;
use crate::logging::RelayLogger;

/// Everything a connection handler needs, built once at startup.
pub struct RelayContext<W> {
    pub config: Arc<Config>,
    pub logger: Arc<RelayLogger>,
    pub sink: ClipboardSink<W>,
}

impl<W: ClipboardWriter> RelayContext<W> {
    pub fn new(config: Arc<Config>, logger: Arc<RelayLogger>, writer: W) -> Self {
        let sink = ClipboardSink::from_config(writer, &config);
        Self {
            config,
            logger,
            sink,
        }
    }
}

/// How a single connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Closed without sending a byte.
    NonData,
    /// Data phase produced no payload.
    Empty,
    /// Payload reached the clipboard.
    Copied { bytes: usize, truncated: bool },
    /// Reading failed or timed out.
    ReadFailed,
    /// The clipboard sink gave up.
    ClipboardFailed,
}

enum ReadResult {
    NonData,
    Data { payload: Bytes, truncated: bool },
}

/// Handle one accepted connection to completion.
///
/// Every failure is logged and contained here; the caller only needs the
/// outcome for bookkeeping.
pub async fn handle_connection<S, W>(
    mut stream: S,
    peer: &str,
    ctx: &RelayContext<W>,
) -> ConnectionOutcome
where
    S: AsyncRead + Unpin,
    W: ClipboardWriter,
{
    let logger = &ctx.logger;
    let max = ctx.config.max_payload_len();
    let deadline = Instant::now() + ctx.config.read_timeout;

    let (payload, truncated) = match read_payload(&mut stream, max, deadline).await {
        Ok(ReadResult::NonData) => {
            logger.info(format!(
                "Control connection from {} closed without data",
                peer
            ));
            return ConnectionOutcome::NonData;
        }
        Ok(ReadResult::Data { payload, truncated }) => (payload, truncated),
        Err(e) => {
            logger.error(format!("Error reading from connection {}: {}", peer, e));
            return ConnectionOutcome::ReadFailed;
        }
    };

    if truncated {
        logger.warning(format!(
            "Data exceeded maximum size limit ({} bytes), truncated",
            max
        ));
    }

    if payload.is_empty() {
        logger.warning(format!("Received empty data from {}", peer));
        return ConnectionOutcome::Empty;
    }

    let len = payload.len();
    logger.debug(format!("Read {} bytes from {}", len, peer));

    if let Err(e) = ctx.sink.copy(payload, logger).await {
        logger.error(format!("Error copying to clipboard: {}", e));
        return ConnectionOutcome::ClipboardFailed;
    }

    if let Err(e) = write_last_activity(&ctx.config.last_file, len) {
        logger.error(format!(
            "Failed to update last activity file {}: {}",
            ctx.config.last_file.display(),
            e
        ));
    }

    logger.info(format!("Copied {} bytes to clipboard", len));
    ConnectionOutcome::Copied {
        bytes: len,
        truncated,
    }
}

/// Read up to `max` bytes, all before `deadline`.
async fn read_payload<S>(stream: &mut S, max: usize, deadline: Instant) -> std::io::Result<ReadResult>
where
    S: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    let n = with_deadline(deadline, stream.read(&mut first)).await?;
    if n == 0 {
        return Ok(ReadResult::NonData);
    }

    let mut buf = BytesMut::with_capacity(max.min(64 * 1024));
    buf.extend_from_slice(&first[..n]);

    // Read straight into `buf` so peak memory stays at the cap.
    with_deadline(deadline, async {
        while buf.len() < max {
            let remaining = max - buf.len();
            if buf.capacity() == buf.len() {
                buf.reserve(remaining.min(64 * 1024));
            }
            let n = (&mut *stream).take(remaining as u64).read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
        }
        Ok::<_, std::io::Error>(())
    })
    .await?;

    let truncated = buf.len() >= max;
    Ok(ReadResult::Data {
        payload: buf.freeze(),
        truncated,
    })
}

async fn with_deadline<F, T>(deadline: Instant, fut: F) -> std::io::Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read deadline exceeded",
        )),
    }
}
