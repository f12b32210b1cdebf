//! Bridge Session
//!
//! A [`Session`] owns one target stream and one framed channel. [`Session::run`]
//! drives the liveness monitor and both relays concurrently on the current
//! task, fires the lifetime signal as soon as any of them terminates, joins the
//! rest and then closes both connections exactly once.

use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::channel::ChannelWriter;
use super::liveness::{run_monitor, Liveness};
use super::relay::{channel_to_stream, stream_to_channel, RelayCounters};
use super::Exit;
use crate::config::SessionConfig;
use crate::error::{BridgeError, ChannelError};
use crate::metrics::BridgeMetrics;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Establishing,
    Active,
    Closing,
    Closed,
}

/// Timing and buffering used by the session tasks
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub read_timeout: Duration,
    pub ping_period: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            read_timeout: config.read_timeout,
            ping_period: config.effective_ping_period(),
            write_timeout: config.write_timeout,
            buffer_size: config.buffer_size,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Why a session ended; decided by the first task to terminate
#[derive(Debug)]
pub enum Termination {
    /// Target stream reached end of data
    StreamClosed,
    /// Peer sent a close frame
    PeerClosed,
    /// Lifetime signal fired from outside the session
    Cancelled,
    Failed(BridgeError),
}

impl Termination {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_liveness_timeout(&self) -> bool {
        matches!(self, Self::Failed(BridgeError::LivenessTimeout(_)))
    }
}

impl From<Result<Exit, BridgeError>> for Termination {
    fn from(outcome: Result<Exit, BridgeError>) -> Self {
        match outcome {
            Ok(Exit::StreamClosed) => Self::StreamClosed,
            Ok(Exit::PeerClosed) => Self::PeerClosed,
            Ok(Exit::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e),
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamClosed => f.write_str("stream connection closed"),
            Self::PeerClosed => f.write_str("peer closed channel"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Summary of a finished session
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub target: String,
    pub duration: Duration,
    /// Channel to stream
    pub bytes_up: u64,
    /// Stream to channel
    pub bytes_down: u64,
    pub termination: Termination,
}

/// One bridged connection
pub struct Session<S, C> {
    id: String,
    target: String,
    stream: S,
    channel: C,
    lifetime: CancellationToken,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl<S, C, E> Session<S, C>
where
    S: AsyncRead + AsyncWrite,
    C: Stream<Item = Result<Message, E>> + Sink<Message, Error = E>,
    E: Into<ChannelError>,
{
    /// Wrap two established connections.
    ///
    /// `lifetime` is cancelled by the session at teardown, so callers that
    /// share a parent signal should pass a child token.
    pub fn new(
        target: impl Into<String>,
        stream: S,
        channel: C,
        settings: SessionSettings,
        lifetime: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Establishing);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target: target.into(),
            stream,
            channel,
            lifetime,
            settings,
            state,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run the session to completion.
    ///
    /// Returns once all three tasks have been joined and both connections
    /// have been closed.
    pub async fn run(self) -> SessionReport {
        let span = tracing::info_span!("session", session_id = %self.id, target = %self.target);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> SessionReport {
        let Session {
            id,
            target,
            stream,
            channel,
            lifetime,
            settings,
            state,
            metrics,
        } = self;

        let started = Instant::now();
        state.send_replace(SessionState::Active);
        if let Some(metrics) = &metrics {
            metrics.session_started();
        }
        info!("Session active");

        let (mut stream_reader, mut stream_writer) = tokio::io::split(stream);
        let (sink, mut channel_reader) = channel.split();
        let channel_writer = ChannelWriter::new(sink);
        let liveness = Liveness::new(settings.read_timeout);
        let counters = RelayCounters::default();
        let first = OnceLock::new();

        let group = TaskGroup {
            lifetime: &lifetime,
            first: &first,
            state: &state,
        };

        tokio::join!(
            group.supervise(
                "liveness monitor",
                run_monitor(
                    &channel_writer,
                    settings.ping_period,
                    settings.write_timeout,
                    &lifetime,
                ),
            ),
            group.supervise(
                "stream-to-channel relay",
                stream_to_channel(
                    &mut stream_reader,
                    &channel_writer,
                    settings.buffer_size,
                    settings.write_timeout,
                    &lifetime,
                    &counters,
                ),
            ),
            group.supervise(
                "channel-to-stream relay",
                channel_to_stream(
                    &mut channel_reader,
                    &mut stream_writer,
                    &liveness,
                    &lifetime,
                    &counters,
                ),
            ),
        );

        if let Err(e) = channel_writer.close(settings.write_timeout).await {
            debug!(error = %e, "Channel close returned an error");
        }
        if let Err(e) = stream_writer.shutdown().await {
            debug!(error = %e, "Stream shutdown returned an error");
        }
        drop(stream_reader);
        drop(stream_writer);
        drop(channel_reader);
        state.send_replace(SessionState::Closed);

        let report = SessionReport {
            session_id: id,
            target,
            duration: started.elapsed(),
            bytes_up: counters.bytes_up(),
            bytes_down: counters.bytes_down(),
            termination: first.into_inner().unwrap_or(Termination::Cancelled),
        };

        info!(
            duration_ms = report.duration.as_millis() as u64,
            bytes_up = report.bytes_up,
            bytes_down = report.bytes_down,
            termination = %report.termination,
            "Session closed"
        );

        if let Some(metrics) = &metrics {
            metrics.session_finished(&report);
        }

        report
    }
}

/// Shared bookkeeping for the three session tasks
struct TaskGroup<'a> {
    lifetime: &'a CancellationToken,
    first: &'a OnceLock<Termination>,
    state: &'a watch::Sender<SessionState>,
}

impl TaskGroup<'_> {
    /// Run one task; when it ends, record it if it was first and fire the
    /// lifetime signal so the others exit.
    async fn supervise<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<Exit, BridgeError>>,
    {
        let outcome = task.await;
        match &outcome {
            Ok(exit) => debug!(task = name, ?exit, "Task finished"),
            Err(e) => warn!(task = name, error = %e, "Task failed"),
        }

        if self.first.set(Termination::from(outcome)).is_ok() {
            self.state.send_replace(SessionState::Closing);
        }
        self.lifetime.cancel();
    }
}
