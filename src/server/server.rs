//! Bridge HTTP Server

use super::handlers::{health_check, metrics_handler, proxy_handler, AppState};
use crate::bridge::Establisher;
use crate::{config::Config, metrics::BridgeMetrics, shutdown::ShutdownCoordinator, Result};
use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Build the router for the given state
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(&state.config.server.path, get(proxy_handler))
        .route("/health", get(health_check));

    if state.config.monitoring.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server hosting the bridge endpoint
pub struct BridgeServer {
    state: AppState,
}

impl BridgeServer {
    /// Create a new server. Cancelling `shutdown` stops the listener and fires
    /// the lifetime signal of every active session.
    pub fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let metrics = BridgeMetrics::new().context("Failed to register bridge metrics")?;

        let state = AppState {
            establisher: Establisher::from_config(&config.session),
            config: Arc::new(config),
            metrics: Arc::new(metrics),
            shutdown,
            sessions: TaskTracker::new(),
            start_time: SystemTime::now(),
        };

        Ok(Self { state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Router for testing
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve until `coordinator` shuts down, listening for termination
    /// signals meanwhile.
    ///
    /// `coordinator` must own the token the server was created with. A server
    /// that stops on its own (for example when binding fails) triggers
    /// shutdown and its error is returned.
    pub async fn run(self, coordinator: ShutdownCoordinator) -> Result<()> {
        let root = coordinator.token();
        let mut server = tokio::spawn(self.start());

        let signals = coordinator.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = signals.listen_for_signals().await {
                error!("Error setting up signal handlers: {}", e);
                signals.trigger();
            }
        });

        let outcome = tokio::select! {
            joined = &mut server => {
                coordinator.trigger();
                joined
            }
            _ = root.cancelled() => {
                info!("Initiating graceful shutdown...");
                server.await
            }
        };
        listener.abort();

        outcome.context("Bridge server task failed")?
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(self) -> Result<()> {
        let bind_addr = self.state.config.server.bind_addr;
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind bridge server to {}", bind_addr))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown, then wait for
    /// active sessions to finish
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr: SocketAddr = listener.local_addr()?;
        let path = &self.state.config.server.path;
        info!("Bridge server listening on {} (path {})", local_addr, path);

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("Bridge server error")?;

        self.drain_sessions().await;
        Ok(())
    }

    async fn drain_sessions(&self) {
        let sessions = &self.state.sessions;
        sessions.close();

        let timeout = self.state.config.server.shutdown_timeout;
        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            sessions.len(),
            timeout
        );

        match tokio::time::timeout(timeout, sessions.wait()).await {
            Ok(()) => info!("All sessions closed"),
            Err(_) => warn!(
                "Shutdown timeout reached with {} sessions still active",
                sessions.len()
            ),
        }
    }
}
