//! Bridge Module
//!
//! Bridges a WebSocket channel to a TCP stream: establishment, the liveness
//! monitor, both relay directions and session teardown.

pub mod channel;
pub mod establish;
pub mod liveness;
pub mod relay;
pub mod session;

pub use establish::{Establisher, PendingTarget};
pub use session::{Session, SessionReport, SessionSettings, SessionState, Termination};

/// How a session task ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    StreamClosed,
    PeerClosed,
    Cancelled,
}
