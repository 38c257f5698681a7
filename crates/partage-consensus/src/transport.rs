//! How consensus reaches other peers

use std::sync::Arc;

use partage_core::{NodeAddr, PartageResult};
use partage_gossip::GossipLayer;
use partage_wire::Message;

/// Sending seam used by acceptors and proposers
pub trait ConsensusTransport: Send + Sync {
    fn local_addr(&self) -> NodeAddr;

    /// Reliable-eventually broadcast, processed locally as well; never blocks
    fn broadcast(&self, msg: Message);

    /// Point-to-point send through the routing table
    fn unicast(&self, dest: &NodeAddr, msg: Message) -> PartageResult<()>;
}

/// [`ConsensusTransport`] over the gossip layer
#[derive(Clone)]
pub struct GossipTransport(pub Arc<GossipLayer>);

impl ConsensusTransport for GossipTransport {
    fn local_addr(&self) -> NodeAddr {
        self.0.local_addr()
    }

    fn broadcast(&self, msg: Message) {
        self.0.spawn_broadcast(msg);
    }

    fn unicast(&self, dest: &NodeAddr, msg: Message) -> PartageResult<()> {
        self.0.unicast(dest, msg)
    }
}
