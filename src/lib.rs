//! wsbridge Library
//!
//! Bridges browser WebSocket clients to arbitrary TCP endpoints. Each upgraded
//! request becomes a session that relays WebSocket messages to a TCP socket
//! and back, with ping/pong liveness tracking and prompt teardown.

pub mod bridge;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use bridge::{Session, SessionReport, SessionState};
pub use config::Config;
pub use error::BridgeError;
pub use server::BridgeServer;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the bridge server
pub type Result<T> = anyhow::Result<T>;
