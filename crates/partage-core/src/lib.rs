//! Partage Core - Fundamental types shared by every layer
//!
//! This crate defines:
//! - Identifiers (NodeAddr, PacketId, ProtocolId)
//! - The error type used across the workspace
//! - Peer configuration and quorum arithmetic

pub mod config;
pub mod error;
pub mod id;

pub use config::*;
pub use error::*;
pub use id::*;
