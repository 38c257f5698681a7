//! Identity types for the Partage network
//!
//! Peers are addressed by their transport address string ("ip:port" for UDP,
//! any unique label for the in-memory network). Packets carry a random id used
//! to correlate acknowledgements.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Network address of a peer
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddr(pub String);

impl NodeAddr {
    #[inline]
    pub fn new(addr: impl Into<String>) -> Self {
        NodeAddr(addr.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddr {
    fn from(addr: &str) -> Self {
        NodeAddr(addr.to_string())
    }
}

impl From<String> for NodeAddr {
    fn from(addr: String) -> Self {
        NodeAddr(addr)
    }
}

/// Packet identity - random 128-bit value rendered as hex
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketId(pub String);

impl PacketId {
    /// Generate a fresh random packet id
    pub fn generate() -> Self {
        PacketId(format!("{:032x}", rand::random::<u128>()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet({})", self.0)
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Topic identity - namespace of one independent consensus log
pub type ProtocolId = String;

/// Topic used when the caller does not name one
pub const DEFAULT_PROTOCOL: &str = "default";
