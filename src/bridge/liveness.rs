//! Liveness Monitor
//!
//! Sends a ping on a fixed period and tracks the read deadline that pongs
//! push forward. The deadline itself is enforced by the channel reader.

use axum::extract::ws::Message;
use futures::Sink;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::channel::ChannelWriter;
use super::Exit;
use crate::error::{BridgeError, ChannelError};

/// Moving read deadline for the framed channel
#[derive(Debug)]
pub struct Liveness {
    window: Duration,
    deadline: Mutex<Instant>,
}

impl Liveness {
    /// Start tracking with a full window ahead
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Mutex::new(Instant::now() + window),
        }
    }

    /// Record a pong: the deadline moves a full window past now
    pub fn acknowledge(&self) {
        let next = Instant::now() + self.window;
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner()) = next;
        trace!(window = ?self.window, "Liveness acknowledged");
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline()
    }
}

/// Emit a zero-payload ping every `period` until the lifetime signal fires.
///
/// A failed probe ends the session; the channel is assumed broken.
pub async fn run_monitor<K, E>(
    writer: &ChannelWriter<K>,
    period: Duration,
    write_timeout: Duration,
    lifetime: &CancellationToken,
) -> Result<Exit, BridgeError>
where
    K: Sink<Message, Error = E> + Unpin,
    E: Into<ChannelError>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Ok(Exit::Cancelled),
            _ = ticker.tick() => {}
        }

        let sent = tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Ok(Exit::Cancelled),
            sent = writer.send_timeout(Message::Ping(Vec::new()), write_timeout) => sent,
        };

        match sent {
            Ok(()) => debug!("Sent liveness probe"),
            Err(source) => {
                let err = BridgeError::ChannelIo { op: "ping", source };
                warn!(error = %err, "Liveness probe failed");
                return Err(err);
            }
        }
    }
}
