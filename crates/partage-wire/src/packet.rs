//! Packet codec

use serde::{Deserialize, Serialize};

use partage_core::{PartageError, PartageResult};

use crate::{Header, Message};

/// Largest payload of a single UDP datagram
pub const MAX_PACKET_SIZE: usize = 65_507;

/// Envelope plus message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: Header,
    pub msg: Message,
}

impl Packet {
    pub fn new(header: Header, msg: Message) -> Self {
        Packet { header, msg }
    }

    /// Serialize, refusing packets that would not fit one datagram
    pub fn encode(&self) -> PartageResult<Vec<u8>> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| PartageError::InvalidWireFormat(e.to_string()))?;
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(PartageError::PacketTooLarge {
                size: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> PartageResult<Self> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(PartageError::PacketTooLarge {
                size: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        serde_json::from_slice(bytes).map_err(|e| PartageError::InvalidWireFormat(e.to_string()))
    }
}
