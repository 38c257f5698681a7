//! Gossip layer: broadcast, ack-retry sending and background tasks

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use partage_core::{NodeAddr, PacketId, PartageError, PartageResult, PeerConfig};
use partage_rendezvous::ResponseBroker;
use partage_transport::{MessageRegistry, Network};
use partage_wire::{Header, Message, Rumor, RumorsMessage, StatusMap, StatusMessage};

use crate::{DeliverySequencer, PeerView};

/// Timing and mongering knobs of the gossip layer
#[derive(Clone, Debug)]
pub struct GossipConfig {
    pub anti_entropy_interval: Duration,
    pub heartbeat_interval: Duration,
    pub ack_timeout: Duration,
    pub continue_mongering: f64,
    pub ack_cache: usize,
}

impl From<&PeerConfig> for GossipConfig {
    fn from(config: &PeerConfig) -> Self {
        GossipConfig {
            anti_entropy_interval: config.anti_entropy_interval,
            heartbeat_interval: config.heartbeat_interval,
            ack_timeout: config.ack_timeout,
            continue_mongering: config.continue_mongering,
            ack_cache: config.rendezvous_cache,
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        GossipConfig::from(&PeerConfig::default())
    }
}

/// Where a rumor ended up
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOutcome {
    /// Neighbor that acknowledged, or was sent to when acks are disabled
    pub delivered_to: Option<NodeAddr>,
    /// Neighbors that did not ack in time, in the order they were tried
    pub unresponsive: Vec<NodeAddr>,
}

/// Epidemic broadcast for one peer
pub struct GossipLayer {
    pub(crate) network: Arc<Network>,
    pub(crate) registry: Arc<MessageRegistry>,
    pub(crate) view: PeerView,
    pub(crate) sequencer: DeliverySequencer,
    pub(crate) acks: ResponseBroker<PacketId, StatusMap>,
    pub(crate) config: GossipConfig,
}

impl GossipLayer {
    pub fn new(
        network: Arc<Network>,
        registry: Arc<MessageRegistry>,
        config: GossipConfig,
    ) -> Arc<Self> {
        let me = network.local_addr();
        Arc::new(GossipLayer {
            network,
            registry,
            view: PeerView::new(me),
            sequencer: DeliverySequencer::new(),
            acks: ResponseBroker::new(config.ack_cache),
            config,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> NodeAddr {
        self.network.local_addr()
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn view(&self) -> &PeerView {
        &self.view
    }

    /// Last processed sequence of `origin` on this peer
    pub fn processed(&self, origin: &NodeAddr) -> u64 {
        self.sequencer.processed(origin)
    }

    /// Broadcast `msg` to every peer.
    ///
    /// The message is processed locally in order with earlier broadcasts and
    /// handed to one random neighbor; the rest is left to relaying and
    /// anti-entropy. Running out of responsive neighbors is not an error.
    pub async fn broadcast(self: &Arc<Self>, msg: Message) -> PartageResult<SendOutcome> {
        let rumor = self.view.next_own_rumor(msg);
        trace!(node = %self.local_addr(), seq = rumor.sequence, kind = %rumor.msg.kind(), "broadcast");

        let header = self.network.header_to(&self.local_addr());
        let layer = Arc::clone(self);
        let local = rumor.clone();
        tokio::spawn(async move {
            layer.process_in_order(local, header).await;
        });

        let msg = Message::Rumors(RumorsMessage {
            rumors: vec![rumor],
        });
        self.send_with_ack(msg, &[]).await
    }

    /// Fire-and-forget [`broadcast`](Self::broadcast)
    pub fn spawn_broadcast(self: &Arc<Self>, msg: Message) {
        let layer = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = layer.broadcast(msg).await {
                warn!(node = %layer.local_addr(), error = %e, "broadcast failed");
            }
        });
    }

    /// Unicast through the routing table without acknowledgement
    pub fn unicast(&self, dest: &NodeAddr, msg: Message) -> PartageResult<()> {
        self.network.unicast(dest, msg).map(|_| ())
    }

    /// Send `msg` to random neighbors until one acks.
    ///
    /// Neighbors in `exclude` are never tried; neighbors that time out are
    /// not tried again for this message.
    pub async fn send_with_ack(&self, msg: Message, exclude: &[NodeAddr]) -> PartageResult<SendOutcome> {
        let mut excluded: Vec<NodeAddr> = exclude.to_vec();
        let mut outcome = SendOutcome::default();

        while let Some(neighbor) = self.network.routing().choose_random_neighbor(&excluded) {
            let packet_id = match self.network.send_to_neighbor(&neighbor, msg.clone()) {
                Ok(id) => id,
                Err(e @ PartageError::PacketTooLarge { .. })
                | Err(e @ PartageError::InvalidWireFormat(_)) => return Err(e),
                Err(e) => {
                    debug!(neighbor = %neighbor, error = %e, "send failed, trying another neighbor");
                    excluded.push(neighbor.clone());
                    outcome.unresponsive.push(neighbor);
                    continue;
                }
            };

            if self.config.ack_timeout.is_zero() {
                outcome.delivered_to = Some(neighbor);
                return Ok(outcome);
            }

            match self.acks.collect_one(packet_id, self.config.ack_timeout).await {
                Some(_) => {
                    outcome.delivered_to = Some(neighbor);
                    return Ok(outcome);
                }
                None => {
                    debug!(neighbor = %neighbor, "no ack, trying another neighbor");
                    excluded.push(neighbor.clone());
                    outcome.unresponsive.push(neighbor);
                }
            }
        }

        trace!(node = %self.local_addr(), "no neighbor left to send to");
        Ok(outcome)
    }

    /// Process an accepted rumor once its origin's earlier rumors are done
    pub(crate) async fn process_in_order(&self, rumor: Rumor, header: Header) {
        self.sequencer.wait_turn(&rumor.origin, rumor.sequence).await;

        let embedded = Header {
            source: rumor.origin.clone(),
            ..header
        };
        if let Err(e) = self.registry.process(rumor.msg, embedded).await {
            warn!(
                node = %self.local_addr(),
                origin = %rumor.origin,
                seq = rumor.sequence,
                error = %e,
                "rumor handler failed"
            );
        }

        self.sequencer.complete(&rumor.origin, rumor.sequence);
    }

    /// Send this peer's status to `dest`
    pub(crate) fn send_status(&self, dest: &NodeAddr) {
        let status = Message::Status(StatusMessage(self.view.status()));
        if let Err(e) = self.network.send_to_neighbor(dest, status) {
            debug!(to = %dest, error = %e, "status send failed");
        }
    }

    /// Start anti-entropy and heartbeat; both stop when `quit` flips to true
    pub fn start_background(self: &Arc<Self>, quit: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if !self.config.heartbeat_interval.is_zero() {
            let layer = Arc::clone(self);
            let interval = self.config.heartbeat_interval;
            handles.push(spawn_periodic(interval, quit.clone(), move || {
                layer.spawn_broadcast(Message::Empty);
            }));
        }

        if !self.config.anti_entropy_interval.is_zero() {
            let layer = Arc::clone(self);
            let interval = self.config.anti_entropy_interval;
            handles.push(spawn_periodic(interval, quit, move || {
                if let Some(neighbor) = layer.network.routing().choose_random_neighbor(&[]) {
                    layer.send_status(&neighbor);
                }
            }));
        }

        handles
    }
}

/// Run `tick` immediately and then every `period` until `quit` is set
fn spawn_periodic<F>(period: Duration, mut quit: watch::Receiver<bool>, tick: F) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        if *quit.borrow() {
            return;
        }
        loop {
            tokio::select! {
                changed = quit.changed() => {
                    if changed.is_err() || *quit.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => tick(),
            }
        }
    })
}
