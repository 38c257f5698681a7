//! Handlers for rumors, status, acks and heartbeats

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, trace};

use partage_core::{NodeAddr, PartageResult};
use partage_transport::MessageHandler;
use partage_wire::{Header, Message, MessageKind, RumorsMessage, StatusMap};

use crate::GossipLayer;

impl GossipLayer {
    /// Install the gossip handlers in the peer's registry
    pub fn register_handlers(self: &Arc<Self>) {
        self.registry.register(MessageKind::Rumors, self.handler(|layer, msg, header| async move {
            match msg {
                Message::Rumors(rumors) => layer.handle_rumors(rumors, header).await,
                _ => Ok(()),
            }
        }));
        self.registry.register(MessageKind::Status, self.handler(|layer, msg, header| async move {
            match msg {
                Message::Status(status) => {
                    layer.handle_status(status.0, &header.relayed_by);
                    Ok(())
                }
                _ => Ok(()),
            }
        }));
        self.registry.register(MessageKind::Ack, self.handler(|layer, msg, header| async move {
            match msg {
                Message::Ack(ack) => {
                    trace!(from = %header.relayed_by, packet = %ack.acked_packet_id, "ack");
                    layer.acks.dispatch(ack.acked_packet_id, ack.status.0.clone());
                    layer.handle_status(ack.status.0, &header.relayed_by);
                    Ok(())
                }
                _ => Ok(()),
            }
        }));
        self.registry.register(MessageKind::Empty, self.handler(|_layer, _msg, header| async move {
            trace!(from = %header.source, "heartbeat");
            Ok(())
        }));
    }

    fn handler<F, Fut>(self: &Arc<Self>, f: F) -> Arc<dyn MessageHandler>
    where
        F: Fn(Arc<GossipLayer>, Message, Header) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = PartageResult<()>> + Send + 'static,
    {
        let layer = Arc::clone(self);
        Arc::new(move |msg: Message, header: Header| f(Arc::clone(&layer), msg, header))
    }

    /// Accept in-order rumors, ack, relay news and process it in sequence
    async fn handle_rumors(self: Arc<Self>, rumors: RumorsMessage, header: Header) -> PartageResult<()> {
        let from = header.relayed_by.clone();

        let mut accepted = Vec::new();
        for rumor in &rumors.rumors {
            if self.view.try_accept(rumor) {
                self.network.routing().learn_route(&rumor.origin, &from);
                accepted.push(rumor.clone());
            } else {
                trace!(origin = %rumor.origin, seq = rumor.sequence, "rumor out of order, dropped");
            }
        }

        let ack = Message::Ack(partage_wire::AckMessage {
            acked_packet_id: header.packet_id.clone(),
            status: partage_wire::StatusMessage(self.view.status()),
        });
        if let Err(e) = self.network.send_to_neighbor(&from, ack) {
            debug!(to = %from, error = %e, "ack send failed");
        }

        if accepted.is_empty() {
            return Ok(());
        }

        let layer = Arc::clone(&self);
        let exclude = [from.clone()];
        tokio::spawn(async move {
            if let Err(e) = layer.send_with_ack(Message::Rumors(rumors), &exclude).await {
                debug!(error = %e, "rumor relay failed");
            }
        });

        for rumor in accepted {
            self.process_in_order(rumor, header.clone()).await;
        }
        Ok(())
    }

    /// Reconcile with a remote status.
    ///
    /// Sends the remote whatever it misses, asks for what this peer misses,
    /// and when both are in sync keeps mongering with probability
    /// `continue_mongering`.
    pub(crate) fn handle_status(&self, remote: StatusMap, from: &NodeAddr) {
        let (remote_news, local_news) = self.view.compare(from, &remote);

        if !local_news.is_empty() {
            trace!(to = %from, count = local_news.len(), "sending missing rumors");
            let msg = Message::Rumors(RumorsMessage { rumors: local_news.clone() });
            if let Err(e) = self.network.send_to_neighbor(from, msg) {
                debug!(to = %from, error = %e, "catch-up send failed");
            }
        }

        if remote_news {
            self.send_status(from);
        }

        if !remote_news && local_news.is_empty() {
            let keep_going = rand::thread_rng().gen_bool(self.config.continue_mongering);
            if keep_going {
                if let Some(neighbor) = self.network.routing().choose_random_neighbor(&[from.clone()]) {
                    self.send_status(&neighbor);
                }
            }
        }
    }
}
