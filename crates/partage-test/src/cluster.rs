//! In-memory cluster of full nodes

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use partage_chain::{load_blockchain, BlockchainBlock, Storage};
use partage_consensus::BlockchainHooks;
use partage_core::{NodeAddr, PartageError, PartageResult, PeerConfig};
use partage_runtime::Node;
use partage_transport::MemoryNetwork;
use partage_wire::{ConsensusMessage, CustomMessage, Header, Message, MessageKind, PaxosMessage};

/// How nodes are linked
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Every node neighbors every other node
    FullMesh,
    /// `node-0 - node-1 - ... - node-n`
    Line,
    /// Node 0 in the middle, every other node a leaf
    Star,
    /// A line plus `extra` random links, reproducible from `seed`
    Random { extra: usize, seed: u64 },
}

impl Topology {
    /// Undirected links between node indices
    pub fn links(&self, size: usize) -> BTreeSet<(usize, usize)> {
        let line = || (1..size).map(|i| (i - 1, i));
        match self {
            Topology::FullMesh => (0..size)
                .flat_map(|a| (a + 1..size).map(move |b| (a, b)))
                .collect(),
            Topology::Line => line().collect(),
            Topology::Star => (1..size).map(|i| (0, i)).collect(),
            Topology::Random { extra, seed } => {
                let mut links: BTreeSet<(usize, usize)> = line().collect();
                if size > 2 {
                    let mut rng = StdRng::seed_from_u64(*seed);
                    for _ in 0..*extra {
                        let a = rng.gen_range(0..size);
                        let b = rng.gen_range(0..size);
                        if a != b {
                            links.insert((a.min(b), a.max(b)));
                        }
                    }
                }
                links
            }
        }
    }
}

/// Cluster configuration
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub size: usize,
    pub topology: Topology,
    /// Seed and rate of random packet loss
    pub loss: Option<(u64, f64)>,
    /// Template for every node; `total_peers` and `paxos_id` are filled in
    pub peer: PeerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            size: 3,
            topology: Topology::FullMesh,
            loss: None,
            peer: PeerConfig {
                proposer_retry: Duration::from_millis(500),
                anti_entropy_interval: Duration::from_millis(200),
                heartbeat_interval: Duration::ZERO,
                ack_timeout: Duration::from_millis(100),
                continue_mongering: 0.0,
                ..PeerConfig::default()
            },
        }
    }
}

impl ClusterConfig {
    /// Two nodes, one link
    pub fn minimal() -> Self {
        ClusterConfig {
            size: 2,
            ..ClusterConfig::default()
        }
    }

    /// Three fully meshed nodes
    pub fn standard() -> Self {
        ClusterConfig::default()
    }

    /// Five nodes on a sparse random graph with 10% loss
    pub fn stress() -> Self {
        ClusterConfig {
            size: 5,
            topology: Topology::Random { extra: 3, seed: 7 },
            loss: Some((7, 0.1)),
            ..ClusterConfig::default()
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_loss(mut self, seed: u64, rate: f64) -> Self {
        self.loss = Some((seed, rate));
        self
    }

    pub fn with_peer(mut self, f: impl FnOnce(&mut PeerConfig)) -> Self {
        f(&mut self.peer);
        self
    }
}

/// Messages of one custom kind seen by a node, with their origin
pub type Recording = Arc<Mutex<Vec<(NodeAddr, Vec<u8>)>>>;

/// Running nodes over one in-memory network
pub struct Cluster {
    net: Arc<MemoryNetwork>,
    nodes: Vec<Node>,
}

impl Cluster {
    /// Start `config.size` nodes named `node-0`, `node-1`, ...
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(config: ClusterConfig) -> PartageResult<Self> {
        let net = match config.loss {
            Some((seed, rate)) => MemoryNetwork::with_loss(seed, rate),
            None => MemoryNetwork::new(),
        };

        let size = u32::try_from(config.size)
            .map_err(|_| PartageError::InvalidConfig(format!("cluster of {} nodes", config.size)))?;
        let mut nodes = Vec::with_capacity(config.size);
        for i in 0..config.size {
            let (socket, packets) = net.join(Cluster::addr_of(i));
            let peer = PeerConfig {
                total_peers: size,
                paxos_id: i as u64 + 1,
                ..config.peer.clone()
            };
            let node = Node::new(Arc::new(socket), peer, Arc::new(Storage::in_memory()))?;
            node.start(packets);
            nodes.push(node);
        }

        for (a, b) in config.topology.links(config.size) {
            nodes[a].add_peers(&[Cluster::addr_of(b)]);
            nodes[b].add_peers(&[Cluster::addr_of(a)]);
        }
        debug!(size = config.size, topology = ?config.topology, "cluster started");

        Ok(Cluster { net, nodes })
    }

    pub fn addr_of(index: usize) -> NodeAddr {
        NodeAddr::new(format!("node-{}", index))
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.net
    }

    /// Take node `index` off the network or bring it back
    pub fn set_online(&self, index: usize, online: bool) {
        self.net.set_online(&Cluster::addr_of(index), online);
    }

    /// Register a plain chain topic on every node
    pub fn register_chain(&self, topic: &str) -> PartageResult<()> {
        self.nodes.iter().try_for_each(|node| node.register_chain(topic))
    }

    /// Register `topic` on every node with hooks built per node
    pub fn register_protocol_with<F>(&self, topic: &str, make: F) -> PartageResult<()>
    where
        F: Fn(usize, &Node) -> Arc<dyn BlockchainHooks>,
    {
        self.nodes
            .iter()
            .enumerate()
            .try_for_each(|(i, node)| node.register_protocol(topic, make(i, node)))
    }

    /// Record every `kind` custom message each node processes
    pub fn record(&self, kind: &str) -> Vec<Recording> {
        self.nodes
            .iter()
            .map(|node| {
                let seen: Recording = Arc::new(Mutex::new(Vec::new()));
                let sink = seen.clone();
                node.registry().register(
                    MessageKind::Custom(kind.to_string()),
                    Arc::new(move |msg: Message, header: Header| {
                        let sink = sink.clone();
                        async move {
                            if let Message::Custom(CustomMessage { payload, .. }) = msg {
                                sink.lock().push((header.source, payload));
                            }
                            Ok::<_, PartageError>(())
                        }
                    }),
                );
                seen
            })
            .collect()
    }

    /// Step of `topic` on every node
    pub fn steps(&self, topic: &str) -> Vec<u64> {
        self.nodes
            .iter()
            .map(|node| {
                node.consensus()
                    .instance(topic)
                    .map_or(0, |instance| instance.step())
            })
            .collect()
    }

    /// Poll until every node in `indices` reached `step` on `topic`
    pub async fn wait_for_step(&self, topic: &str, indices: &[usize], step: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let steps = self.steps(topic);
            if indices.iter().all(|&i| steps[i] >= step) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(topic, ?steps, step, "steps not reached");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// [`wait_for_step`](Self::wait_for_step) for the whole cluster
    pub async fn wait_for_all(&self, topic: &str, step: u64, timeout: Duration) -> bool {
        let all: Vec<usize> = (0..self.len()).collect();
        self.wait_for_step(topic, &all, step, timeout).await
    }

    /// TLC broadcasts each node originated for `topic`, counted per step
    pub fn tlc_broadcasts(&self, topic: &str) -> Vec<BTreeMap<u64, usize>> {
        self.nodes
            .iter()
            .map(|node| {
                let mut counts = BTreeMap::new();
                for rumor in node.gossip().view().rumors_from(&node.addr()) {
                    if let Message::Consensus(ConsensusMessage {
                        protocol_id,
                        inner: PaxosMessage::Tlc { step, .. },
                    }) = rumor.msg
                    {
                        if protocol_id == topic {
                            *counts.entry(step).or_insert(0) += 1;
                        }
                    }
                }
                counts
            })
            .collect()
    }

    /// Chain of `topic` persisted by each node, oldest block first
    pub fn chains(&self, topic: &str) -> PartageResult<Vec<Vec<BlockchainBlock>>> {
        self.nodes
            .iter()
            .map(|node| load_blockchain(node.consensus().storage().blockchain_store(topic).as_ref()))
            .collect()
    }

    pub async fn stop(&self) {
        for node in &self.nodes {
            node.stop().await;
        }
    }
}
