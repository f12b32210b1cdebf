//! HTTP Handlers

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::types::HealthStatus;
use crate::bridge::{Establisher, PendingTarget, Session, SessionSettings};
use crate::config::Config;
use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub establisher: Establisher,
    pub metrics: Arc<BridgeMetrics>,
    /// Parent of every session's lifetime signal
    pub shutdown: CancellationToken,
    pub sessions: TaskTracker,
    pub start_time: SystemTime,
}

/// Bridge endpoint.
///
/// Validates the target, connects to it, then upgrades. Failures before the
/// upgrade are answered with a JSON error; the target connection is released
/// on every failure path, including an upgrade that outlives the handshake
/// timeout.
pub async fn proxy_handler(
    State(state): State<AppState>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let target = match query
        .map_err(BridgeError::from)
        .and_then(|Query(params)| {
            let raw = params.get(&state.config.server.address_param);
            Establisher::validate_target(raw.map(String::as_str))
        }) {
        Ok(target) => target,
        Err(e) => {
            state.metrics.record_validation_failure();
            debug!(error = %e, "Rejected bridge request");
            return e.into_response();
        }
    };

    state.metrics.record_connect_attempt();
    let stream = match state.establisher.connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            state.metrics.record_connect_failure();
            return e.into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            drop(stream);
            state.metrics.record_handshake_failure();
            let err = BridgeError::Handshake(rejection.to_string());
            warn!(target = %target, error = %err, "Protocol upgrade rejected");
            return err.into_response();
        }
    };

    let pending = PendingTarget::new(stream);
    spawn_handshake_deadline(&state, &target, pending.clone());

    let settings = SessionSettings::from(&state.config.session);
    let lifetime = state.shutdown.child_token();
    let failed_pending = pending.clone();
    let failed_metrics = Arc::clone(&state.metrics);
    let failed_target = target.clone();

    upgrade
        .on_failed_upgrade(move |e: axum::Error| {
            if failed_pending.claim().is_some() {
                failed_metrics.record_handshake_failure();
            }
            let err = BridgeError::Handshake(e.to_string());
            warn!(target = %failed_target, error = %err, "Protocol upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let Some(stream) = pending.claim() else {
                debug!(target = %target, "Upgrade finished after the target was released");
                return;
            };

            let session = Session::new(target, stream, socket, settings, lifetime)
                .with_metrics(Arc::clone(&state.metrics));
            info!(session_id = %session.id(), target = %session.target(), "Upgrade complete");
            state.sessions.track_future(session.run()).await;
        })
}

/// Release the dialed target if the upgrade has not claimed it in time
fn spawn_handshake_deadline(state: &AppState, target: &str, pending: PendingTarget<TcpStream>) {
    let limit = state.config.session.handshake_timeout;
    let metrics = Arc::clone(&state.metrics);
    let target = target.to_string();

    tokio::spawn(async move {
        if pending.expire_after(limit).await {
            metrics.record_handshake_failure();
            warn!(
                target = %target,
                timeout = ?limit,
                "Protocol upgrade exceeded handshake timeout"
            );
        }
    });
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();

    Json(HealthStatus {
        status: "ok".to_string(),
        active_sessions: state.metrics.active_sessions(),
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}
