//! HTTP Response Types

use serde::{Deserialize, Serialize};

/// JSON error body: `{"msg": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub msg: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// Health check body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub active_sessions: i64,
    pub uptime_seconds: u64,
    pub version: String,
}
