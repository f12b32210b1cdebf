//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub monitoring: MonitoringConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Route serving the bridge endpoint
    pub path: String,
    /// Query parameter carrying the `host:port` target
    pub address_param: String,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Per-session timing and buffering
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Liveness window: channel reads fail once it passes without a pong
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Probe period; 9/10 of `read_timeout` when unset
    #[serde(with = "humantime_serde")]
    pub ping_period: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    pub buffer_size: usize,
    /// Outbound connect bound; platform default when unset
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
}

impl SessionConfig {
    /// Period between liveness probes
    pub fn effective_ping_period(&self) -> Duration {
        self.ping_period
            .unwrap_or_else(|| self.read_timeout * 9 / 10)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/proxy".to_string(),
            address_param: "address".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            ping_period: None,
            write_timeout: Duration::from_secs(10),
            buffer_size: 32 * 1024,
            connect_timeout: None,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ping_period_is_nine_tenths() {
        let session = SessionConfig::default();
        assert_eq!(session.effective_ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            read_timeout = "20s"
            ping_period = "5s"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.read_timeout, Duration::from_secs(20));
        assert_eq!(config.session.effective_ping_period(), Duration::from_secs(5));
        assert_eq!(config.session.buffer_size, 32 * 1024);
        assert_eq!(config.server.path, "/proxy");
        assert_eq!(config.server.address_param, "address");
    }
}
