//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from `path` when it exists (defaults otherwise),
    /// then apply `WSBRIDGE_*` overrides supplied by `lookup` and validate.
    /// Does not log; callers report the outcome once tracing is up.
    pub fn load<F>(path: &Path, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(lookup)?;
        config.validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }

    /// Parse a TOML document; fields it omits keep their defaults
    pub fn parse(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }
}

impl Config {
    /// Override fields from `WSBRIDGE_*` variables supplied by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind_addr) = lookup("WSBRIDGE_BIND_ADDR") {
            self.server.bind_addr = bind_addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid WSBRIDGE_BIND_ADDR: {}", bind_addr))?;
        }

        if let Some(timeout) = lookup("WSBRIDGE_READ_TIMEOUT") {
            self.session.read_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid WSBRIDGE_READ_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = lookup("WSBRIDGE_HANDSHAKE_TIMEOUT") {
            self.session.handshake_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid WSBRIDGE_HANDSHAKE_TIMEOUT: {}", timeout))?;
        }

        if let Some(buffer_size) = lookup("WSBRIDGE_BUFFER_SIZE") {
            self.session.buffer_size = buffer_size.parse::<usize>()
                .with_context(|| format!("Invalid WSBRIDGE_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Some(log_level) = lookup("WSBRIDGE_LOG_LEVEL") {
            self.monitoring.log_level = log_level;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_session_config()
            .with_context(|| "Session configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if !self.server.path.starts_with('/') {
            bail!("server.path must start with '/'");
        }

        if ["/health", "/metrics"].contains(&self.server.path.as_str()) {
            bail!("server.path {} collides with a built-in endpoint", self.server.path);
        }

        if self.server.address_param.is_empty() {
            bail!("server.address_param must not be empty");
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_session_config(&self) -> Result<()> {
        let session = &self.session;

        if session.handshake_timeout.is_zero() {
            bail!("handshake_timeout must be greater than 0");
        }

        if session.read_timeout.is_zero() {
            bail!("read_timeout must be greater than 0");
        }

        if session.write_timeout.is_zero() {
            bail!("write_timeout must be greater than 0");
        }

        let ping_period = session.effective_ping_period();
        if ping_period.is_zero() {
            bail!("ping_period must be greater than 0");
        }

        if ping_period >= session.read_timeout {
            bail!(
                "ping_period ({:?}) must be shorter than read_timeout ({:?})",
                ping_period,
                session.read_timeout
            );
        }

        if matches!(session.connect_timeout, Some(t) if t.is_zero()) {
            bail!("connect_timeout must be greater than 0 when set");
        }

        if session.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if session.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        path: Option<&str>,
        read_timeout: Option<u64>,
        buffer_size: Option<usize>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(path) = path {
            self.server.path = path.to_string();
            tracing::info!("CLI override: bridge path set to {}", path);
        }

        if let Some(timeout_secs) = read_timeout {
            self.session.read_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: read timeout set to {}s", timeout_secs);
        }

        if let Some(buffer_size) = buffer_size {
            self.session.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}
