//! Error types for the Partage network

use thiserror::Error;

use crate::NodeAddr;

/// Core Partage errors
#[derive(Error, Debug)]
pub enum PartageError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("No route to {0}")]
    NoRoute(NodeAddr),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(NodeAddr),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Consensus is disabled for {0} total peers")]
    ConsensusDisabled(u32),

    #[error("Unknown consensus protocol: {0}")]
    UnknownProtocol(String),

    #[error("Protocol already registered: {0}")]
    ProtocolExists(String),

    #[error("Cannot shrink system size from {old} to {new}")]
    SystemShrink { old: u32, new: u32 },

    // Consensus errors
    #[error("Proposal {uniq_id} rejected by {rejects} peers")]
    ProposalRejected { uniq_id: String, rejects: usize },

    #[error("Failed to apply committed block at step {step}: {reason}")]
    CommitApply { step: u64, reason: String },

    // Storage and chain errors
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Chain integrity violation at index {index}: {reason}")]
    ChainIntegrity { index: u64, reason: String },

    #[error("Node stopped")]
    Stopped,
}

/// Result type for Partage operations
pub type PartageResult<T> = Result<T, PartageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PartageError::ConsensusDisabled(1);
        assert_eq!(err.to_string(), "Consensus is disabled for 1 total peers");

        let err = PartageError::CommitApply {
            step: 3,
            reason: "disk full".into(),
        };
        assert!(err.to_string().contains("step 3"));
    }
}
