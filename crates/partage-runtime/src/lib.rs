//! Partage Runtime - peer assembly and main loop
//!
//! A [`Node`] owns one socket and runs:
//! 1. The receive loop, one task per inbound packet
//! 2. Relaying of packets addressed to other peers
//! 3. Gossip anti-entropy and heartbeats
//!
//! Everything stops when the node's quit signal is raised.

pub mod config;
pub mod node;
pub mod telemetry;

pub use config::{apply_env, from_env};
pub use node::*;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
