//! Partage Test Harness - multi-node clusters and protocol scenarios
//!
//! This crate provides:
//! - An in-memory cluster of full nodes with configurable topology and loss
//! - Agreement, chain integrity and idempotence checks
//! - End-to-end gossip and consensus scenarios

pub mod checks;
pub mod cluster;
pub mod scenarios;

pub use checks::*;
pub use cluster::*;
pub use scenarios::*;
