//! Metrics Module
//!
//! Process-wide counters for connection attempts, sessions and relayed bytes.

pub mod collector;

pub use collector::BridgeMetrics;
