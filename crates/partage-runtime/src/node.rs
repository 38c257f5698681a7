//! Partage node: socket, routing, gossip and consensus wired together

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use partage_chain::{BlockchainBlock, PaxosValue, Storage};
use partage_consensus::{BlockchainHooks, ConsensusLayer, GossipTransport};
use partage_core::{NodeAddr, PartageError, PartageResult, PeerConfig};
use partage_gossip::{GossipConfig, GossipLayer, SendOutcome};
use partage_transport::{MessageRegistry, Network, PacketReceiver, Socket, UdpTransport, RECEIVE_BUFFER};
use partage_wire::{Message, Packet};

/// Counters of the receive loop
#[derive(Debug, Default)]
pub struct RuntimeStats {
    pub packets_in: AtomicU64,
    pub packets_relayed: AtomicU64,
    pub relay_failures: AtomicU64,
    pub handler_errors: AtomicU64,
}

/// Point-in-time copy of [`RuntimeStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_in: u64,
    pub packets_relayed: u64,
    pub relay_failures: u64,
    pub handler_errors: u64,
}

impl RuntimeStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
            relay_failures: self.relay_failures.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

/// One peer of the system
pub struct Node {
    config: PeerConfig,
    network: Arc<Network>,
    registry: Arc<MessageRegistry>,
    gossip: Arc<GossipLayer>,
    consensus: Arc<ConsensusLayer>,
    stats: Arc<RuntimeStats>,
    quit: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Assemble a node over `socket`; nothing runs until [`start`](Self::start)
    pub fn new(socket: Arc<dyn Socket>, config: PeerConfig, storage: Arc<Storage>) -> PartageResult<Self> {
        config.validate()?;

        let network = Arc::new(Network::new(socket, config.packet_ttl));
        let registry = Arc::new(MessageRegistry::new());

        let gossip = GossipLayer::new(network.clone(), registry.clone(), GossipConfig::from(&config));
        gossip.register_handlers();

        let transport = Arc::new(GossipTransport(gossip.clone()));
        let consensus = ConsensusLayer::new(transport, storage, config.clone());
        consensus.register_handlers(&registry);

        Ok(Node {
            config,
            network,
            registry,
            gossip,
            consensus,
            stats: Arc::new(RuntimeStats::default()),
            quit: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bind a UDP socket and start the node on it
    pub async fn bind_udp(addr: SocketAddr, config: PeerConfig, storage: Arc<Storage>) -> PartageResult<Self> {
        let udp = UdpTransport::bind(addr).await?;
        let packets = udp.start_receive_loop(RECEIVE_BUFFER);
        let node = Node::new(Arc::new(udp), config, storage)?;
        node.start(packets);
        Ok(node)
    }

    /// Start the receive loop and the gossip background tasks
    pub fn start(&self, packets: PacketReceiver) {
        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_receive_loop(packets));
        tasks.extend(self.gossip.start_background(self.quit.subscribe()));
        info!(node = %self.addr(), total_peers = self.config.total_peers, "node started");
    }

    fn spawn_receive_loop(&self, mut packets: PacketReceiver) -> JoinHandle<()> {
        let mut quit = self.quit.subscribe();
        let me = self.addr();
        let network = self.network.clone();
        let registry = self.registry.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            if *quit.borrow() {
                return;
            }
            loop {
                let packet = tokio::select! {
                    changed = quit.changed() => {
                        if changed.is_err() || *quit.borrow() {
                            break;
                        }
                        continue;
                    }
                    packet = packets.recv() => match packet {
                        Some(packet) => packet,
                        None => break,
                    },
                };
                stats.packets_in.fetch_add(1, Ordering::Relaxed);

                if packet.header.destination != me {
                    relay(&network, &stats, &packet);
                    continue;
                }

                let registry = registry.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let Packet { header, msg } = packet;
                    let kind = msg.kind();
                    let from = header.relayed_by.clone();
                    if let Err(e) = registry.process(msg, header).await {
                        stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(kind = %kind, from = %from, error = %e, "handler failed");
                    }
                });
            }
            debug!(node = %me, "receive loop stopped");
        })
    }

    /// Stop background work and release the handlers
    pub async fn stop(&self) {
        self.quit.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(node = %self.addr(), error = %e, "task ended abnormally");
            }
        }
        self.registry.clear();
        info!(node = %self.addr(), "node stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.quit.borrow()
    }

    fn check_running(&self) -> PartageResult<()> {
        if self.is_stopped() {
            return Err(PartageError::Stopped);
        }
        Ok(())
    }

    #[inline]
    pub fn addr(&self) -> NodeAddr {
        self.network.local_addr()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn gossip(&self) -> &Arc<GossipLayer> {
        &self.gossip
    }

    pub fn consensus(&self) -> &Arc<ConsensusLayer> {
        &self.consensus
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Add direct neighbors
    pub fn add_peers(&self, peers: &[NodeAddr]) {
        self.network.routing().add_peers(peers);
    }

    /// Reach `origin` through `relay`; an empty relay removes the entry
    pub fn set_routing_entry(&self, origin: NodeAddr, relay: NodeAddr) {
        self.network.routing().set_routing_entry(origin, relay);
    }

    pub async fn broadcast(&self, msg: Message) -> PartageResult<SendOutcome> {
        self.check_running()?;
        self.gossip.broadcast(msg).await
    }

    pub fn unicast(&self, dest: &NodeAddr, msg: Message) -> PartageResult<()> {
        self.check_running()?;
        self.gossip.unicast(dest, msg)
    }

    pub fn register_protocol(&self, topic: &str, hooks: Arc<dyn BlockchainHooks>) -> PartageResult<()> {
        self.consensus.register_protocol(topic, hooks)
    }

    pub fn register_chain(&self, topic: &str) -> PartageResult<()> {
        self.consensus.register_chain(topic)
    }

    pub async fn propose(&self, topic: &str, value: PaxosValue) -> PartageResult<BlockchainBlock> {
        self.check_running()?;
        self.consensus.propose_with_protocol(topic, value).await
    }

    /// Bind `filename` to `metahash` on the naming chain
    pub async fn tag(&self, filename: &str, metahash: &str) -> PartageResult<BlockchainBlock> {
        self.check_running()?;
        self.consensus.tag(filename, metahash).await
    }

    pub fn resolve(&self, filename: &str) -> Option<String> {
        self.consensus.resolve(filename)
    }
}

fn relay(network: &Network, stats: &RuntimeStats, packet: &Packet) {
    let dest = &packet.header.destination;
    match network.relay(packet) {
        Ok(()) => {
            stats.packets_relayed.fetch_add(1, Ordering::Relaxed);
            trace!(dest = %dest, kind = %packet.msg.kind(), "relayed");
        }
        Err(e) => {
            stats.relay_failures.fetch_add(1, Ordering::Relaxed);
            debug!(dest = %dest, error = %e, "relay failed");
        }
    }
}
