//! Consensus messages, multiplexed per topic

use serde::{Deserialize, Serialize};

use partage_chain::{BlockchainBlock, PaxosValue};
use partage_core::{NodeAddr, ProtocolId};

/// One phase message of a paxos instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaxosMessage {
    Prepare {
        step: u64,
        id: u64,
        source: NodeAddr,
    },
    Promise {
        step: u64,
        id: u64,
        /// Zero when nothing was accepted at this step
        accepted_id: u64,
        accepted_value: Option<PaxosValue>,
    },
    Propose {
        step: u64,
        id: u64,
        value: PaxosValue,
        source: NodeAddr,
    },
    Accept {
        step: u64,
        id: u64,
        value: PaxosValue,
    },
    /// Sent back to the proposer when the proposal check refuses a value
    Reject {
        step: u64,
        id: u64,
        value: PaxosValue,
    },
    Tlc {
        step: u64,
        block: BlockchainBlock,
    },
}

impl PaxosMessage {
    pub fn step(&self) -> u64 {
        match self {
            PaxosMessage::Prepare { step, .. }
            | PaxosMessage::Promise { step, .. }
            | PaxosMessage::Propose { step, .. }
            | PaxosMessage::Accept { step, .. }
            | PaxosMessage::Reject { step, .. }
            | PaxosMessage::Tlc { step, .. } => *step,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PaxosMessage::Prepare { .. } => "prepare",
            PaxosMessage::Promise { .. } => "promise",
            PaxosMessage::Propose { .. } => "propose",
            PaxosMessage::Accept { .. } => "accept",
            PaxosMessage::Reject { .. } => "reject",
            PaxosMessage::Tlc { .. } => "tlc",
        }
    }
}

/// Paxos message tagged with the topic it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub protocol_id: ProtocolId,
    pub inner: PaxosMessage,
}

impl ConsensusMessage {
    pub fn new(protocol_id: impl Into<ProtocolId>, inner: PaxosMessage) -> Self {
        ConsensusMessage {
            protocol_id: protocol_id.into(),
            inner,
        }
    }
}
