//! Framed Channel Writer
//!
//! The WebSocket transport permits one writer at a time. Probe frames from the
//! liveness monitor and data frames from the stream relay both go through a
//! [`ChannelWriter`], which serializes them behind an async mutex.

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::ChannelError;

/// Reason attached to the close frame sent when the target stream ends
pub const STREAM_CLOSED_REASON: &str = "stream connection closed";

/// Serialized write half of a framed channel
pub struct ChannelWriter<K> {
    sink: Mutex<K>,
}

impl<K, E> ChannelWriter<K>
where
    K: Sink<Message, Error = E> + Unpin,
    E: Into<ChannelError>,
{
    pub fn new(sink: K) -> Self {
        Self { sink: Mutex::new(sink) }
    }

    /// Send one frame and flush it
    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        let mut sink = self.sink.lock().await;
        sink.send(message).await.map_err(Into::into)
    }

    /// Send one frame, giving up after `limit`
    pub async fn send_timeout(&self, message: Message, limit: Duration) -> Result<(), ChannelError> {
        match tokio::time::timeout(limit, self.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(write_timed_out(limit)),
        }
    }

    /// Close the channel. Consumes the writer so the close happens once.
    pub async fn close(self, limit: Duration) -> Result<(), ChannelError> {
        let mut sink = self.sink.into_inner();
        match tokio::time::timeout(limit, sink.close()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(write_timed_out(limit)),
        }
    }
}

fn write_timed_out(limit: Duration) -> ChannelError {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("write timed out after {:?}", limit),
    ))
}

/// Normal-closure frame carrying a human-readable reason
pub fn close_message(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: reason.into(),
    }))
}
