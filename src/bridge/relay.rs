//! Relay Tasks
//!
//! One task per direction. Neither retries: every error is terminal for the
//! session.

use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::{close_message, ChannelWriter, STREAM_CLOSED_REASON};
use super::liveness::Liveness;
use super::Exit;
use crate::error::{BridgeError, ChannelError};

/// Bytes moved in each direction
#[derive(Debug, Default)]
pub struct RelayCounters {
    /// Channel to stream (client to target)
    pub bytes_up: AtomicU64,
    /// Stream to channel (target to client)
    pub bytes_down: AtomicU64,
}

impl RelayCounters {
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }
}

/// Pump bytes from the target socket to the peer.
///
/// Each successful read becomes exactly one binary message. When the stream
/// ends or fails, a normal-closure frame is sent as a best effort.
pub async fn stream_to_channel<R, K, E>(
    reader: &mut R,
    writer: &ChannelWriter<K>,
    buffer_size: usize,
    write_timeout: Duration,
    lifetime: &CancellationToken,
    counters: &RelayCounters,
) -> Result<Exit, BridgeError>
where
    R: AsyncRead + Unpin,
    K: Sink<Message, Error = E> + Unpin,
    E: Into<ChannelError>,
{
    let mut buf = vec![0u8; buffer_size];

    let ended = loop {
        let read = tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Ok(Exit::Cancelled),
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break Ok(Exit::StreamClosed),
            Ok(n) => n,
            Err(e) => break Err(BridgeError::stream_read(e)),
        };

        let sent = tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Ok(Exit::Cancelled),
            sent = writer.send(Message::Binary(buf[..n].to_vec())) => sent,
        };
        sent.map_err(BridgeError::channel_write)?;
        counters.bytes_down.fetch_add(n as u64, Ordering::Relaxed);
    };

    match &ended {
        Ok(_) => debug!("Target stream reached end of data"),
        Err(e) => warn!(error = %e, "Target stream read failed"),
    }

    if let Err(e) = writer
        .send_timeout(close_message(STREAM_CLOSED_REASON), write_timeout)
        .await
    {
        warn!(error = %e, "Failed to send close notification");
    }

    ended
}

/// Pump messages from the peer to the target socket.
///
/// Reads are bounded by the liveness deadline. A close frame ends the loop
/// normally; pongs move the deadline forward; pings are answered by the
/// transport.
pub async fn channel_to_stream<M, W, E>(
    reader: &mut M,
    writer: &mut W,
    liveness: &Liveness,
    lifetime: &CancellationToken,
    counters: &RelayCounters,
) -> Result<Exit, BridgeError>
where
    M: Stream<Item = Result<Message, E>> + Unpin,
    W: AsyncWrite + Unpin,
    E: Into<ChannelError>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Ok(Exit::Cancelled),
            next = tokio::time::timeout_at(liveness.deadline(), reader.next()) => next,
        };

        let message = match next {
            Err(_) if liveness.is_expired() => {
                return Err(BridgeError::LivenessTimeout(liveness.window()));
            }
            // Deadline moved while waiting
            Err(_) => continue,
            Ok(None) => {
                return Err(BridgeError::channel_read(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "channel ended without a close frame",
                )));
            }
            Ok(Some(Err(e))) => return Err(BridgeError::channel_read(e)),
            Ok(Some(Ok(message))) => message,
        };

        let payload = match message {
            Message::Close(frame) => {
                debug!(?frame, "Peer sent close frame");
                return Ok(Exit::PeerClosed);
            }
            Message::Pong(_) => {
                liveness.acknowledge();
                continue;
            }
            Message::Ping(_) => continue,
            Message::Binary(data) => data,
            Message::Text(text) => text.into_bytes(),
        };

        let written = tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Ok(Exit::Cancelled),
            written = write_payload(writer, &payload) => written,
        };
        written.map_err(BridgeError::stream_write)?;
        counters.bytes_up.fetch_add(payload.len() as u64, Ordering::Relaxed);
    }
}

async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.flush().await
}
