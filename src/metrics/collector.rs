//! Metrics Collector

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use tracing::error;

use crate::bridge::SessionReport;

/// Process-wide bridge counters backed by a prometheus registry
pub struct BridgeMetrics {
    registry: Registry,

    connect_attempts: IntCounter,
    connect_failures: IntCounter,
    validation_failures: IntCounter,
    handshake_failures: IntCounter,
    sessions_started: IntCounter,
    sessions_completed: IntCounter,
    liveness_timeouts: IntCounter,
    active_sessions: IntGauge,
    bytes_stream_to_channel: IntCounter,
    bytes_channel_to_stream: IntCounter,
}

impl BridgeMetrics {
    /// Create and register all bridge metrics
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let connect_attempts = counter(
            "wsbridge_connect_attempts_total",
            "Outbound TCP connection attempts",
        )?;
        let connect_failures = counter(
            "wsbridge_connect_failures_total",
            "Outbound TCP connection attempts that failed",
        )?;
        let validation_failures = counter(
            "wsbridge_validation_failures_total",
            "Requests rejected for a missing or invalid target address",
        )?;
        let handshake_failures = counter(
            "wsbridge_handshake_failures_total",
            "WebSocket upgrades that failed after the target was connected",
        )?;
        let sessions_started = counter(
            "wsbridge_sessions_started_total",
            "Bridge sessions that reached the active state",
        )?;
        let sessions_completed = counter(
            "wsbridge_sessions_completed_total",
            "Bridge sessions that were torn down",
        )?;
        let liveness_timeouts = counter(
            "wsbridge_liveness_timeouts_total",
            "Sessions terminated because no pong arrived in time",
        )?;
        let bytes_stream_to_channel = counter(
            "wsbridge_bytes_stream_to_channel_total",
            "Bytes read from target sockets and sent as WebSocket messages",
        )?;
        let bytes_channel_to_stream = counter(
            "wsbridge_bytes_channel_to_stream_total",
            "Bytes received as WebSocket messages and written to target sockets",
        )?;

        let active_sessions = IntGauge::new(
            "wsbridge_active_sessions",
            "Number of currently active bridge sessions",
        )?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            connect_attempts,
            connect_failures,
            validation_failures,
            handshake_failures,
            sessions_started,
            sessions_completed,
            liveness_timeouts,
            active_sessions,
            bytes_stream_to_channel,
            bytes_channel_to_stream,
        })
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.inc();
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.inc();
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.inc();
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.inc();
    }

    /// Mark a session as active
    pub fn session_started(&self) {
        self.sessions_started.inc();
        self.active_sessions.inc();
    }

    /// Fold a finished session into the totals
    pub fn session_finished(&self, report: &SessionReport) {
        self.sessions_completed.inc();
        self.active_sessions.dec();
        self.bytes_channel_to_stream.inc_by(report.bytes_up);
        self.bytes_stream_to_channel.inc_by(report.bytes_down);
        if report.termination.is_liveness_timeout() {
            self.liveness_timeouts.inc();
        }
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.get()
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.get()
    }

    pub fn validation_failures(&self) -> u64 {
        self.validation_failures.get()
    }

    pub fn handshake_failures(&self) -> u64 {
        self.handshake_failures.get()
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.get()
    }

    pub fn liveness_timeouts(&self) -> u64 {
        self.liveness_timeouts.get()
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.get()
    }

    pub fn bytes_channel_to_stream(&self) -> u64 {
        self.bytes_channel_to_stream.get()
    }

    pub fn bytes_stream_to_channel(&self) -> u64 {
        self.bytes_stream_to_channel.get()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}
