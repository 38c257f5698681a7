//! One paxos instance: the clock, acceptor and proposer of a topic

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{info, trace};

use partage_chain::{BlockchainBlock, PaxosValue};
use partage_core::{PartageError, PartageResult, PeerConfig, ProtocolId};
use partage_wire::PaxosMessage;

use crate::{
    AcceptReply, Acceptor, BlockchainHooks, Clock, ConsensusTransport, PromiseReply, Proposer,
    ProposerInbox, ProposerPhase, Quorum,
};

/// Paxos state of one topic on one peer
pub struct PaxosInstance {
    topic: ProtocolId,
    clock: Arc<Mutex<Clock>>,
    quorum: Arc<Quorum>,
    inbox: Arc<ProposerInbox>,
    acceptor: Acceptor,
    proposer: Proposer,
    /// Serializes proposals of this topic on this peer
    proposal_lock: AsyncMutex<()>,
    /// Held shared by message handling, exclusively by a size update
    handle_lock: AsyncRwLock<()>,
}

impl PaxosInstance {
    pub fn new(
        topic: impl Into<ProtocolId>,
        config: &PeerConfig,
        hooks: Arc<dyn BlockchainHooks>,
        transport: Arc<dyn ConsensusTransport>,
    ) -> Self {
        let topic = topic.into();
        let clock = Arc::new(Mutex::new(Clock::new()));
        let quorum = Arc::new(Quorum::from_config(config));
        let inbox = Arc::new(ProposerInbox::new(config.rendezvous_cache));

        let acceptor = Acceptor::new(
            topic.clone(),
            clock.clone(),
            hooks,
            transport.clone(),
            quorum.clone(),
            inbox.clone(),
        );
        let proposer = Proposer::new(
            topic.clone(),
            config.paxos_id,
            clock.clone(),
            quorum.clone(),
            inbox.clone(),
            transport,
            config.proposer_retry,
            config.commit_wait,
        );

        PaxosInstance {
            topic,
            clock,
            quorum,
            inbox,
            acceptor,
            proposer,
            proposal_lock: AsyncMutex::new(()),
            handle_lock: AsyncRwLock::new(()),
        }
    }

    pub fn topic(&self) -> &ProtocolId {
        &self.topic
    }

    /// Current step, i.e. the number of committed blocks
    pub fn step(&self) -> u64 {
        self.clock.lock().step
    }

    pub fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    /// Read the clock under its lock
    pub fn with_clock<R>(&self, f: impl FnOnce(&Clock) -> R) -> R {
        f(&self.clock.lock())
    }

    pub fn proposer_phase(&self) -> watch::Receiver<ProposerPhase> {
        self.proposer.subscribe()
    }

    /// Commit `value` on this topic; waits for any earlier local proposal
    pub async fn propose(&self, value: PaxosValue) -> PartageResult<BlockchainBlock> {
        let _proposal = self.proposal_lock.lock().await;
        trace!(topic = %self.topic, uniq_id = %value.uniq_id, "proposal started");
        self.proposer.run(value).await
    }

    /// Route one paxos message to the acceptor or the local proposer
    pub async fn handle(&self, msg: PaxosMessage) -> PartageResult<()> {
        let _handling = self.handle_lock.read().await;
        trace!(topic = %self.topic, kind = msg.name(), step = msg.step(), "paxos message");

        match msg {
            PaxosMessage::Prepare { step, id, source } => self.acceptor.handle_prepare(step, id, &source),
            PaxosMessage::Promise {
                id,
                accepted_id,
                accepted_value,
                ..
            } => {
                self.inbox.offer_promise(
                    id,
                    PromiseReply {
                        accepted_id,
                        accepted_value,
                    },
                );
                Ok(())
            }
            PaxosMessage::Propose {
                step,
                id,
                value,
                source,
            } => self.acceptor.handle_propose(step, id, value, &source),
            PaxosMessage::Accept { step, id, value } => {
                self.inbox.offer_accept(id, AcceptReply::Accepted(value.clone()));
                self.acceptor.handle_accept(step, id, &value)
            }
            PaxosMessage::Reject { id, value, .. } => {
                self.inbox.offer_accept(id, AcceptReply::Rejected(value));
                Ok(())
            }
            PaxosMessage::Tlc { step, block } => self.acceptor.handle_tlc(step, block),
        }
    }

    /// Grow the topic to `new` peers once the in-flight proposal finished
    pub async fn update_system_size(&self, new: u32) -> PartageResult<()> {
        let _proposal = self.proposal_lock.lock().await;
        let _handling = self.handle_lock.write().await;

        let old = self.quorum.total_peers();
        if new < old {
            return Err(PartageError::SystemShrink { old, new });
        }
        self.proposer.rebase(old, new);
        self.quorum.set_total_peers(new);
        info!(topic = %self.topic, old, new, "system size updated");
        Ok(())
    }
}
