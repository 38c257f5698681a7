//! Partage transport layer
//!
//! This crate provides:
//! - The [`Socket`] seam with a UDP and an in-memory implementation
//! - The routing table and next-hop forwarding ([`Network`])
//! - The typed dispatch table mapping message kinds to handlers

pub mod memory;
pub mod network;
pub mod registry;
pub mod routing;
pub mod socket;
pub mod udp;

pub use memory::*;
pub use network::*;
pub use registry::*;
pub use routing::*;
pub use socket::*;
pub use udp::*;
