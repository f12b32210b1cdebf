//! Session Establisher
//!
//! Validates the requested target and opens the outbound TCP connection. The
//! protocol upgrade that follows is driven by the HTTP layer; until it
//! completes the dialed connection waits in a [`PendingTarget`].

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::BridgeError;

/// Opens outbound connections for new sessions
#[derive(Debug, Clone, Default)]
pub struct Establisher {
    connect_timeout: Option<Duration>,
}

impl Establisher {
    /// `None` leaves the connect bound to the platform default
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.connect_timeout)
    }

    /// Check the request parameter before any resource is allocated.
    ///
    /// Accepts `host:port`, including bracketed IPv6 hosts.
    pub fn validate_target(raw: Option<&str>) -> Result<String, BridgeError> {
        let target = raw.map(str::trim).unwrap_or_default();
        if target.is_empty() {
            return Err(BridgeError::Validation(
                "address is a required parameter".to_string(),
            ));
        }

        let valid = match target.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0),
            None => false,
        };
        if !valid {
            return Err(BridgeError::Validation(format!(
                "invalid address {:?}: expected host:port",
                target
            )));
        }

        Ok(target.to_string())
    }

    /// Open a TCP connection to `target`
    pub async fn connect(&self, target: &str) -> Result<TcpStream, BridgeError> {
        let connect_error = |source| BridgeError::Connect {
            target: target.to_string(),
            source,
        };

        if target.is_empty() {
            return Err(connect_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty target address",
            )));
        }

        debug!(target, "Connecting to target");
        let attempt = TcpStream::connect(target);
        let result = match self.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connection timed out after {:?}", limit),
                )),
            },
            None => attempt.await,
        };

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                info!(target, "Connected to target");
                Ok(stream)
            }
            Err(e) => {
                warn!(target, error = %e, "Failed to connect to target");
                Err(connect_error(e))
            }
        }
    }
}

/// A dialed target connection waiting for the upgrade to finish.
///
/// Exactly one party claims the connection: the upgrade callback, the
/// failed-upgrade callback, or the handshake deadline. Whoever comes second
/// gets `None`.
pub struct PendingTarget<S> {
    slot: Arc<Mutex<Option<S>>>,
    claimed: CancellationToken,
}

impl<S> Clone for PendingTarget<S> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            claimed: self.claimed.clone(),
        }
    }
}

impl<S> PendingTarget<S> {
    pub fn new(stream: S) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(stream))),
            claimed: CancellationToken::new(),
        }
    }

    /// Take the connection if nobody has yet
    pub fn claim(&self) -> Option<S> {
        let stream = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.claimed.cancel();
        stream
    }

    /// Drop the connection once `limit` passes unclaimed. Returns `true` if
    /// the deadline fired first.
    pub async fn expire_after(self, limit: Duration) -> bool {
        tokio::select! {
            _ = self.claimed.cancelled() => false,
            _ = tokio::time::sleep(limit) => self.claim().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_missing_target_is_rejected() {
        for raw in [None, Some(""), Some("   ")] {
            match Establisher::validate_target(raw) {
                Err(BridgeError::Validation(msg)) => assert!(!msg.is_empty()),
                other => panic!("unexpected result for {:?}: {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_target_must_be_host_port() {
        assert!(Establisher::validate_target(Some("localhost")).is_err());
        assert!(Establisher::validate_target(Some(":5432")).is_err());
        assert!(Establisher::validate_target(Some("db:0")).is_err());
        assert!(Establisher::validate_target(Some("db:99999")).is_err());

        assert_eq!(
            Establisher::validate_target(Some("db.internal:5432")).unwrap(),
            "db.internal:5432"
        );
        assert_eq!(
            Establisher::validate_target(Some("[::1]:5432")).unwrap(),
            "[::1]:5432"
        );
    }

    #[tokio::test]
    async fn test_connect_to_listening_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let establisher = Establisher::default();
        let stream = establisher.connect(&addr.to_string()).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port nobody is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Establisher::new(Some(Duration::from_secs(5)))
            .connect(&addr.to_string())
            .await;

        match result {
            Err(BridgeError::Connect { target, .. }) => assert_eq!(target, addr.to_string()),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_empty_target_fails_to_connect() {
        let result = Establisher::default().connect("").await;
        assert!(matches!(result, Err(BridgeError::Connect { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimed_target_is_dropped_at_deadline() {
        let (stream, mut peer) = tokio::io::duplex(64);
        let pending = PendingTarget::new(stream);

        let expired = pending.clone().expire_after(Duration::from_secs(30)).await;
        assert!(expired);
        assert!(pending.claim().is_none());

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_beats_deadline() {
        let (stream, _peer) = tokio::io::duplex(64);
        let pending = PendingTarget::new(stream);
        let deadline = tokio::spawn(pending.clone().expire_after(Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(pending.claim().is_some());
        assert!(!deadline.await.unwrap());
        assert!(pending.claim().is_none());
    }
}
