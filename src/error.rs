//! Bridge Error Types

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;

use crate::server::types::ErrorResponse;

/// Boxed error used for framed-channel failures, whose concrete type depends
/// on the channel implementation.
pub type ChannelError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while establishing or running a bridge session
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Missing or malformed target address
    #[error("{0}")]
    Validation(String),

    /// Outbound connection to the target failed
    #[error("dial {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Protocol upgrade failed after the target connection was opened
    #[error("upgrade: {0}")]
    Handshake(String),

    /// Read or write failure on the target socket
    #[error("{op} socket: {source}")]
    StreamIo {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Read or write failure on the framed channel
    #[error("{op} ws: {source}")]
    ChannelIo {
        op: &'static str,
        #[source]
        source: ChannelError,
    },

    /// No liveness acknowledgement within the read window
    #[error("no pong received within {0:?}")]
    LivenessTimeout(Duration),
}

impl BridgeError {
    pub fn stream_read(source: std::io::Error) -> Self {
        Self::StreamIo { op: "read", source }
    }

    pub fn stream_write(source: std::io::Error) -> Self {
        Self::StreamIo { op: "write", source }
    }

    pub fn channel_read<E: Into<ChannelError>>(source: E) -> Self {
        Self::ChannelIo { op: "read", source: source.into() }
    }

    pub fn channel_write<E: Into<ChannelError>>(source: E) -> Self {
        Self::ChannelIo { op: "write", source: source.into() }
    }

    /// HTTP status used when the error is reported before the upgrade
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryRejection> for BridgeError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
