//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM/SIGINT and cancels the root token. Every session's
//! lifetime signal is derived from that token, so a shutdown reaches all of
//! them.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;

/// Owns the root cancellation token for the process
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root token handed to the server
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown without waiting for a signal
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then cancel the root token.
    /// Returns early if shutdown was triggered some other way.
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = self.token.cancelled() => return Ok(()),
            }
        }

        #[cfg(windows)]
        {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
                _ = self.token.cancelled() => return Ok(()),
            }
        }

        self.token.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_child_tokens() {
        let coordinator = ShutdownCoordinator::new();
        let session_lifetime = coordinator.token().child_token();

        assert!(!coordinator.is_shutting_down());
        coordinator.trigger();

        tokio::time::timeout(Duration::from_secs(1), session_lifetime.cancelled())
            .await
            .unwrap();
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_shut_down() {
        let coordinator = ShutdownCoordinator::new();
        let session_lifetime = coordinator.token().child_token();

        session_lifetime.cancel();
        assert!(!coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_listener_returns_after_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let listener = coordinator.clone();

        let handle = tokio::spawn(async move { listener.listen_for_signals().await });
        coordinator.trigger();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
