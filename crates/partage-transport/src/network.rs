//! Addressed sending on top of a socket and a routing table

use std::sync::Arc;

use tracing::trace;

use partage_core::{NodeAddr, PacketId, PartageError, PartageResult};
use partage_wire::{Header, Message, Packet};

use crate::{RoutingTable, Socket};

/// Sending half of a peer: socket plus routing
pub struct Network {
    socket: Arc<dyn Socket>,
    routing: RoutingTable,
    ttl: u32,
}

impl Network {
    pub fn new(socket: Arc<dyn Socket>, ttl: u32) -> Self {
        let routing = RoutingTable::new(socket.local_addr());
        Network {
            socket,
            routing,
            ttl,
        }
    }

    #[inline]
    pub fn local_addr(&self) -> NodeAddr {
        self.socket.local_addr()
    }

    #[inline]
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Fresh header from this peer to `dest`
    pub fn header_to(&self, dest: &NodeAddr) -> Header {
        let me = self.local_addr();
        Header::new(me.clone(), me, dest.clone(), self.ttl)
    }

    /// Send `msg` to `dest` through the routing table.
    ///
    /// Sending to this peer's own address loops the packet back through the
    /// socket. Returns the id of the packet that was sent.
    pub fn unicast(&self, dest: &NodeAddr, msg: Message) -> PartageResult<PacketId> {
        let packet = Packet::new(self.header_to(dest), msg);
        let id = packet.header.packet_id.clone();
        self.route(&packet)?;
        Ok(id)
    }

    /// Send `msg` straight to a neighbor, bypassing the routing table
    pub fn send_to_neighbor(&self, neighbor: &NodeAddr, msg: Message) -> PartageResult<PacketId> {
        let packet = Packet::new(self.header_to(neighbor), msg);
        let id = packet.header.packet_id.clone();
        self.socket.send(neighbor, &packet)?;
        Ok(id)
    }

    /// Send an already built packet towards its destination
    pub fn route(&self, packet: &Packet) -> PartageResult<()> {
        let dest = &packet.header.destination;
        let next_hop = self
            .routing
            .next_hop(dest)
            .ok_or_else(|| PartageError::NoRoute(dest.clone()))?;
        trace!(dest = %dest, next_hop = %next_hop, kind = %packet.msg.kind(), "routing packet");
        self.socket.send(&next_hop, packet)
    }

    /// Forward a packet addressed to another peer, one hop closer to expiry
    pub fn relay(&self, packet: &Packet) -> PartageResult<()> {
        let header = packet
            .header
            .forwarded_by(self.local_addr())
            .ok_or_else(|| PartageError::TransportError(format!(
                "hop limit exhausted for packet {}",
                packet.header.packet_id
            )))?;
        self.route(&Packet::new(header, packet.msg.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryNetwork;

    #[tokio::test]
    async fn test_unicast_loops_back_to_self() {
        let net = MemoryNetwork::new();
        let (socket, mut rx) = net.join("a");
        let network = Network::new(Arc::new(socket), 8);

        network.unicast(&NodeAddr::from("a"), Message::Empty).unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.header.destination.as_str(), "a");
    }

    #[test]
    fn test_unicast_without_route_fails() {
        let net = MemoryNetwork::new();
        let (socket, _rx) = net.join("a");
        let network = Network::new(Arc::new(socket), 8);
        assert!(matches!(
            network.unicast(&NodeAddr::from("z"), Message::Empty),
            Err(PartageError::NoRoute(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_rewrites_header() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.join("a");
        let (b, _rx_b) = net.join("b");
        let (_c, mut rx_c) = net.join("c");

        let network_a = Network::new(Arc::new(a), 8);
        network_a.routing().add_peers(&[NodeAddr::from("b")]);
        network_a
            .routing()
            .set_routing_entry(NodeAddr::from("c"), NodeAddr::from("b"));
        let network_b = Network::new(Arc::new(b), 8);
        network_b.routing().add_peers(&[NodeAddr::from("c")]);

        let packet = Packet::new(network_a.header_to(&NodeAddr::from("c")), Message::Empty);
        network_b.relay(&packet).unwrap();

        let got = rx_c.recv().await.unwrap();
        assert_eq!(got.header.source.as_str(), "a");
        assert_eq!(got.header.relayed_by.as_str(), "b");
        assert_eq!(got.header.ttl, 7);
    }
}
