//! Packet envelope

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use partage_core::{NodeAddr, PacketId};

/// Default hop limit for a freshly created packet
pub const DEFAULT_TTL: u32 = 64;

/// Envelope carried by every packet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Random id, correlates acknowledgements
    pub packet_id: PacketId,
    /// Remaining hops before the packet is dropped
    pub ttl: u32,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Peer that created the packet
    pub source: NodeAddr,
    /// Peer that last forwarded the packet
    pub relayed_by: NodeAddr,
    /// Final recipient
    pub destination: NodeAddr,
}

impl Header {
    /// Fresh header with a new packet id and the current time
    pub fn new(source: NodeAddr, relayed_by: NodeAddr, destination: NodeAddr, ttl: u32) -> Self {
        Header {
            packet_id: PacketId::generate(),
            ttl,
            timestamp: now_millis(),
            source,
            relayed_by,
            destination,
        }
    }

    /// Header for a packet sent directly by its creator
    pub fn direct(source: NodeAddr, destination: NodeAddr) -> Self {
        Header::new(source.clone(), source, destination, DEFAULT_TTL)
    }

    /// Copy of the header as forwarded by `relay`, one hop closer to expiry.
    ///
    /// Returns `None` once the hop limit is exhausted.
    pub fn forwarded_by(&self, relay: NodeAddr) -> Option<Header> {
        if self.ttl == 0 {
            return None;
        }
        Some(Header {
            ttl: self.ttl - 1,
            relayed_by: relay,
            ..self.clone()
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
