//! In-memory network for tests and simulations
//!
//! Every joined node gets a [`MemorySocket`] and a receiver. Packets sent to
//! an offline node, or dropped by the configured loss rate, vanish silently
//! the way UDP datagrams do.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use partage_core::{NodeAddr, PartageError, PartageResult};
use partage_wire::Packet;

use crate::{PacketReceiver, Socket, RECEIVE_BUFFER};

struct Endpoint {
    tx: mpsc::Sender<Packet>,
    online: bool,
}

/// Shared medium connecting [`MemorySocket`]s
pub struct MemoryNetwork {
    endpoints: RwLock<HashMap<NodeAddr, Endpoint>>,
    /// Directed links that drop everything
    cut: RwLock<HashSet<(NodeAddr, NodeAddr)>>,
    loss_rate: f64,
    rng: Mutex<StdRng>,
    dropped: Mutex<u64>,
}

impl MemoryNetwork {
    /// Lossless network
    pub fn new() -> Arc<Self> {
        MemoryNetwork::with_loss(0, 0.0)
    }

    /// Network dropping each packet with probability `loss_rate`
    pub fn with_loss(seed: u64, loss_rate: f64) -> Arc<Self> {
        Arc::new(MemoryNetwork {
            endpoints: RwLock::new(HashMap::new()),
            cut: RwLock::new(HashSet::new()),
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            dropped: Mutex::new(0),
        })
    }

    /// Attach a node; re-joining replaces the previous receiver
    pub fn join(self: &Arc<Self>, addr: impl Into<NodeAddr>) -> (MemorySocket, PacketReceiver) {
        let addr = addr.into();
        let (tx, rx) = mpsc::channel(RECEIVE_BUFFER);
        self.endpoints
            .write()
            .insert(addr.clone(), Endpoint { tx, online: true });
        let socket = MemorySocket {
            addr,
            network: Arc::clone(self),
        };
        (socket, rx)
    }

    /// Take a node off the network or bring it back
    pub fn set_online(&self, addr: &NodeAddr, online: bool) {
        if let Some(endpoint) = self.endpoints.write().get_mut(addr) {
            endpoint.online = online;
        }
    }

    pub fn is_online(&self, addr: &NodeAddr) -> bool {
        self.endpoints
            .read()
            .get(addr)
            .map(|e| e.online)
            .unwrap_or(false)
    }

    /// Drop everything sent from `from` to `to`
    pub fn cut_link(&self, from: &NodeAddr, to: &NodeAddr) {
        self.cut.write().insert((from.clone(), to.clone()));
    }

    pub fn restore_link(&self, from: &NodeAddr, to: &NodeAddr) {
        self.cut.write().remove(&(from.clone(), to.clone()));
    }

    /// Packets lost so far to loss, cuts or offline nodes
    pub fn dropped(&self) -> u64 {
        *self.dropped.lock()
    }

    fn deliver(&self, from: &NodeAddr, to: &NodeAddr, packet: &Packet) -> PartageResult<()> {
        let tx = {
            let endpoints = self.endpoints.read();
            let dest = endpoints
                .get(to)
                .ok_or_else(|| PartageError::PeerUnreachable(to.clone()))?;
            let sender_online = endpoints.get(from).map(|e| e.online).unwrap_or(true);
            if !dest.online || !sender_online {
                *self.dropped.lock() += 1;
                return Ok(());
            }
            dest.tx.clone()
        };

        if self.cut.read().contains(&(from.clone(), to.clone())) {
            *self.dropped.lock() += 1;
            return Ok(());
        }

        if self.loss_rate > 0.0 && self.rng.lock().gen::<f64>() < self.loss_rate {
            *self.dropped.lock() += 1;
            return Ok(());
        }

        if let Err(e) = tx.try_send(packet.clone()) {
            tracing::debug!(to = %to, error = %e, "memory network dropped packet");
            *self.dropped.lock() += 1;
        }
        Ok(())
    }
}

/// A node's handle on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemorySocket {
    addr: NodeAddr,
    network: Arc<MemoryNetwork>,
}

impl MemorySocket {
    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }
}

impl Socket for MemorySocket {
    fn local_addr(&self) -> NodeAddr {
        self.addr.clone()
    }

    fn send(&self, next_hop: &NodeAddr, packet: &Packet) -> PartageResult<()> {
        self.network.deliver(&self.addr, next_hop, packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partage_wire::{Header, Message};

    fn packet(from: &str, to: &str) -> Packet {
        Packet::new(Header::direct(NodeAddr::from(from), NodeAddr::from(to)), Message::Empty)
    }

    #[tokio::test]
    async fn test_memory_delivery() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.join("a");
        let (_b, mut rx_b) = net.join("b");

        a.send(&NodeAddr::from("b"), &packet("a", "b")).unwrap();
        let got = rx_b.recv().await.unwrap();
        assert_eq!(got.header.source.as_str(), "a");
    }

    #[tokio::test]
    async fn test_offline_node_loses_packets() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.join("a");
        let (_b, mut rx_b) = net.join("b");
        net.set_online(&NodeAddr::from("b"), false);

        a.send(&NodeAddr::from("b"), &packet("a", "b")).unwrap();
        assert!(rx_b.try_recv().is_err());
        assert_eq!(net.dropped(), 1);

        net.set_online(&NodeAddr::from("b"), true);
        a.send(&NodeAddr::from("b"), &packet("a", "b")).unwrap();
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_cut_link_is_directed() {
        let net = MemoryNetwork::new();
        let (a, mut rx_a) = net.join("a");
        let (b, mut rx_b) = net.join("b");
        net.cut_link(&NodeAddr::from("a"), &NodeAddr::from("b"));

        a.send(&NodeAddr::from("b"), &packet("a", "b")).unwrap();
        b.send(&NodeAddr::from("a"), &packet("b", "a")).unwrap();
        assert!(rx_b.try_recv().is_err());
        assert!(rx_a.recv().await.is_some());
    }

    #[test]
    fn test_unknown_peer_is_unreachable() {
        let net = MemoryNetwork::new();
        let (a, _rx) = net.join("a");
        assert!(matches!(
            a.send(&NodeAddr::from("ghost"), &packet("a", "ghost")),
            Err(PartageError::PeerUnreachable(_))
        ));
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let net = MemoryNetwork::with_loss(7, 1.0);
        let (a, _rx_a) = net.join("a");
        let (_b, mut rx_b) = net.join("b");
        for _ in 0..10 {
            a.send(&NodeAddr::from("b"), &packet("a", "b")).unwrap();
        }
        assert!(rx_b.try_recv().is_err());
        assert_eq!(net.dropped(), 10);
    }
}
