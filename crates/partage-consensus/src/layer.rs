//! Registry of consensus topics

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use partage_chain::{BlockchainBlock, NameRecord, PaxosValue, Storage};
use partage_core::{PartageError, PartageResult, PeerConfig, ProtocolId, DEFAULT_PROTOCOL};
use partage_transport::MessageRegistry;
use partage_wire::{ConsensusMessage, Header, Message, MessageKind};

use crate::{BlockchainHooks, ChainHooks, ConsensusTransport, NamingChain, PaxosInstance};

/// Consensus layer of one peer
pub struct ConsensusLayer {
    transport: Arc<dyn ConsensusTransport>,
    storage: Arc<Storage>,
    config: RwLock<PeerConfig>,
    instances: RwLock<HashMap<ProtocolId, Arc<PaxosInstance>>>,
}

impl ConsensusLayer {
    /// Build the layer with the naming chain registered as the default topic
    pub fn new(
        transport: Arc<dyn ConsensusTransport>,
        storage: Arc<Storage>,
        config: PeerConfig,
    ) -> Arc<Self> {
        let naming = NamingChain::new(
            storage.blockchain_store(DEFAULT_PROTOCOL),
            storage.naming_store(),
        );
        let default = Arc::new(PaxosInstance::new(
            DEFAULT_PROTOCOL,
            &config,
            Arc::new(naming),
            transport.clone(),
        ));

        let mut instances = HashMap::new();
        instances.insert(DEFAULT_PROTOCOL.to_string(), default);

        Arc::new(ConsensusLayer {
            transport,
            storage,
            config: RwLock::new(config),
            instances: RwLock::new(instances),
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Add a topic driven by `hooks`
    pub fn register_protocol(&self, topic: impl Into<ProtocolId>, hooks: Arc<dyn BlockchainHooks>) -> PartageResult<()> {
        let topic = topic.into();
        let mut instances = self.instances.write();
        if instances.contains_key(&topic) {
            return Err(PartageError::ProtocolExists(topic));
        }
        let config = self.config.read().clone();
        let instance = PaxosInstance::new(topic.clone(), &config, hooks, self.transport.clone());
        instances.insert(topic.clone(), Arc::new(instance));
        info!(topic = %topic, total_peers = config.total_peers, "protocol registered");
        Ok(())
    }

    /// Add a topic whose blocks are appended to its own chain store
    pub fn register_chain(&self, topic: impl Into<ProtocolId>) -> PartageResult<()> {
        let topic = topic.into();
        let hooks = ChainHooks::new(self.storage.blockchain_store(&topic));
        self.register_protocol(topic, Arc::new(hooks))
    }

    pub fn is_registered(&self, topic: &str) -> bool {
        self.instances.read().contains_key(topic)
    }

    pub fn instance(&self, topic: &str) -> Option<Arc<PaxosInstance>> {
        self.instances.read().get(topic).cloned()
    }

    pub fn protocols(&self) -> Vec<ProtocolId> {
        let mut topics: Vec<ProtocolId> = self.instances.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Propose on the default topic
    pub async fn propose(&self, value: PaxosValue) -> PartageResult<BlockchainBlock> {
        self.propose_with_protocol(DEFAULT_PROTOCOL, value).await
    }

    /// Commit `value` on `topic` and return the block holding it
    pub async fn propose_with_protocol(&self, topic: &str, value: PaxosValue) -> PartageResult<BlockchainBlock> {
        let total_peers = self.config.read().total_peers;
        if total_peers <= 1 {
            return Err(PartageError::ConsensusDisabled(total_peers));
        }
        let instance = self
            .instance(topic)
            .ok_or_else(|| PartageError::UnknownProtocol(topic.to_string()))?;
        instance.propose(value).await
    }

    /// Bind `filename` to `metahash` through the naming chain
    pub async fn tag(&self, filename: &str, metahash: &str) -> PartageResult<BlockchainBlock> {
        let value = NameRecord::new(filename, metahash).to_value()?;
        self.propose(value).await
    }

    /// Metahash committed for `filename`, if any
    pub fn resolve(&self, filename: &str) -> Option<String> {
        let bytes = self.storage.naming_store().get(filename)?;
        String::from_utf8(bytes).ok()
    }

    /// Grow every topic to `new` peers
    pub async fn update_system_size(&self, new: u32) -> PartageResult<()> {
        let old = self.config.read().total_peers;
        if new < old {
            return Err(PartageError::SystemShrink { old, new });
        }

        let instances: Vec<Arc<PaxosInstance>> = self.instances.read().values().cloned().collect();
        for instance in instances {
            instance.update_system_size(new).await?;
        }
        self.config.write().total_peers = new;
        Ok(())
    }

    /// Route a consensus message to its topic; unknown topics are dropped
    pub async fn handle(&self, msg: ConsensusMessage) -> PartageResult<()> {
        match self.instance(&msg.protocol_id) {
            Some(instance) => instance.handle(msg.inner).await,
            None => {
                debug!(topic = %msg.protocol_id, kind = msg.inner.name(), "unknown topic, dropped");
                Ok(())
            }
        }
    }

    /// Install the consensus handler in the peer's registry
    pub fn register_handlers(self: &Arc<Self>, registry: &MessageRegistry) {
        let layer = Arc::clone(self);
        registry.register(
            MessageKind::Consensus,
            Arc::new(move |msg: Message, _header: Header| {
                let layer = Arc::clone(&layer);
                async move {
                    match msg {
                        Message::Consensus(msg) => layer.handle(msg).await,
                        _ => Ok(()),
                    }
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partage_core::NodeAddr;

    struct Silent;

    impl ConsensusTransport for Silent {
        fn local_addr(&self) -> NodeAddr {
            NodeAddr::from("me")
        }
        fn broadcast(&self, _msg: Message) {}
        fn unicast(&self, _dest: &NodeAddr, _msg: Message) -> PartageResult<()> {
            Ok(())
        }
    }

    fn layer(total_peers: u32) -> Arc<ConsensusLayer> {
        let config = PeerConfig {
            total_peers,
            ..PeerConfig::default()
        };
        ConsensusLayer::new(Arc::new(Silent), Arc::new(Storage::in_memory()), config)
    }

    #[test]
    fn test_default_topic_is_registered() {
        let layer = layer(3);
        assert!(layer.is_registered(DEFAULT_PROTOCOL));
        assert!(!layer.is_registered("t"));
        layer.register_chain("t").unwrap();
        assert!(layer.is_registered("t"));
        assert_eq!(layer.protocols(), vec!["default".to_string(), "t".to_string()]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let layer = layer(3);
        layer.register_chain("t").unwrap();
        assert!(matches!(
            layer.register_chain("t"),
            Err(PartageError::ProtocolExists(t)) if t == "t"
        ));
    }

    #[tokio::test]
    async fn test_single_peer_cannot_propose() {
        let layer = layer(1);
        let result = layer.propose(PaxosValue::new(b"x".to_vec())).await;
        assert!(matches!(result, Err(PartageError::ConsensusDisabled(1))));
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let layer = layer(3);
        let result = layer
            .propose_with_protocol("nope", PaxosValue::new(b"x".to_vec()))
            .await;
        assert!(matches!(result, Err(PartageError::UnknownProtocol(t)) if t == "nope"));
    }

    #[tokio::test]
    async fn test_messages_for_unknown_topics_are_dropped() {
        let layer = layer(3);
        let msg = ConsensusMessage::new(
            "nope",
            partage_wire::PaxosMessage::Prepare {
                step: 0,
                id: 1,
                source: NodeAddr::from("p"),
            },
        );
        assert!(layer.handle(msg).await.is_ok());
    }

    #[tokio::test]
    async fn test_size_update_applies_to_new_topics() {
        let layer = layer(3);
        layer.update_system_size(5).await.unwrap();
        layer.register_chain("t").unwrap();
        assert_eq!(layer.instance("t").unwrap().quorum().total_peers(), 5);
        assert_eq!(layer.instance(DEFAULT_PROTOCOL).unwrap().quorum().total_peers(), 5);
        assert!(layer.update_system_size(2).await.is_err());
    }
}
