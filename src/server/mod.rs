//! HTTP Server Module
//!
//! Accepts upgrade requests on the bridge path and serves health and metrics
//! endpoints.

pub mod handlers;
pub mod server;
pub mod types;

pub use handlers::AppState;
pub use server::{create_router, BridgeServer};
pub use types::{ErrorResponse, HealthStatus};
