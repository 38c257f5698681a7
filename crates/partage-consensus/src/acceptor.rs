//! Reactive acceptor side of a paxos instance

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use partage_chain::{BlockchainBlock, PaxosValue};
use partage_core::{NodeAddr, PartageError, PartageResult, ProtocolId};
use partage_wire::{ConsensusMessage, PaxosMessage};

use crate::{BlockchainHooks, Clock, ConsensusTransport, ProposerInbox, Quorum};

/// Acceptor of one topic on one peer
pub struct Acceptor {
    topic: ProtocolId,
    clock: Arc<Mutex<Clock>>,
    hooks: Arc<dyn BlockchainHooks>,
    transport: Arc<dyn ConsensusTransport>,
    quorum: Arc<Quorum>,
    inbox: Arc<ProposerInbox>,
}

impl Acceptor {
    pub fn new(
        topic: ProtocolId,
        clock: Arc<Mutex<Clock>>,
        hooks: Arc<dyn BlockchainHooks>,
        transport: Arc<dyn ConsensusTransport>,
        quorum: Arc<Quorum>,
        inbox: Arc<ProposerInbox>,
    ) -> Self {
        Acceptor {
            topic,
            clock,
            hooks,
            transport,
            quorum,
            inbox,
        }
    }

    fn wrap(&self, inner: PaxosMessage) -> ConsensusMessage {
        ConsensusMessage::new(self.topic.clone(), inner)
    }

    /// Promise not to take part in rounds below `id` at this step
    pub fn handle_prepare(&self, step: u64, id: u64, source: &NodeAddr) -> PartageResult<()> {
        let promise = {
            let mut clock = self.clock.lock();
            if clock.should_ignore_prepare(step, id) {
                trace!(topic = %self.topic, clock = %clock, step, id, "stale prepare");
                return Ok(());
            }
            clock.update_max_id(id);
            PaxosMessage::Promise {
                step,
                id,
                accepted_id: clock.accepted_id,
                accepted_value: clock.accepted_value.clone(),
            }
        };

        if let Err(e) = self.transport.unicast(source, self.wrap(promise).into()) {
            debug!(topic = %self.topic, to = %source, error = %e, "promise not sent");
        }
        Ok(())
    }

    /// Accept the value of the promised round, unless the topic refuses it
    pub fn handle_propose(&self, step: u64, id: u64, value: PaxosValue, source: &NodeAddr) -> PartageResult<()> {
        let mut clock = self.clock.lock();
        if clock.should_ignore_propose(step, id) {
            trace!(topic = %self.topic, clock = %clock, step, id, "stale propose");
            return Ok(());
        }

        if !self.hooks.check_proposal(step, &value) {
            drop(clock);
            debug!(topic = %self.topic, step, id, uniq_id = %value.uniq_id, "proposal refused");
            let reject = self.wrap(PaxosMessage::Reject { step, id, value });
            if let Err(e) = self.transport.unicast(source, reject.into()) {
                debug!(topic = %self.topic, to = %source, error = %e, "reject not sent");
            }
            return Ok(());
        }

        clock.accept(id, value.clone());
        drop(clock);
        self.transport
            .broadcast(self.wrap(PaxosMessage::Accept { step, id, value }).into());
        Ok(())
    }

    /// Count an accept; the threshold-th one triggers this peer's TLC
    pub fn handle_accept(&self, step: u64, id: u64, value: &PaxosValue) -> PartageResult<()> {
        let block = {
            let mut clock = self.clock.lock();
            if clock.should_ignore_propose(step, id) {
                return Ok(());
            }
            if !clock.notify_acceptance(&value.uniq_id, self.quorum.threshold()) {
                return Ok(());
            }
            if clock.has_broadcasted(step) {
                return Ok(());
            }
            clock.mark_broadcasted(step);

            match self.hooks.generate_block(step, value) {
                Ok(block) => block,
                Err(e) => {
                    clock.unmark_broadcasted(step);
                    return Err(e);
                }
            }
        };

        debug!(topic = %self.topic, step, uniq_id = %value.uniq_id, "value accepted by threshold");
        self.transport
            .broadcast(self.wrap(PaxosMessage::Tlc { step, block }).into());
        Ok(())
    }

    /// Count a TLC vote and apply every step that reached the threshold.
    ///
    /// A block that fails to apply leaves the clock where it was, so the
    /// step is retried on the next TLC for it.
    pub fn handle_tlc(&self, step: u64, block: BlockchainBlock) -> PartageResult<()> {
        let mut applied = Vec::new();
        let mut failure = None;
        let rebroadcast = {
            let mut clock = self.clock.lock();
            if step < clock.step {
                trace!(topic = %self.topic, clock = %clock, step, "stale tlc");
                return Ok(());
            }
            clock.notify_tlc(step, block.clone());

            let threshold = self.quorum.threshold();
            while let Some(ready) = clock.ready_block(threshold).cloned() {
                match self.hooks.apply_block(&ready) {
                    Ok(()) => {
                        debug!(topic = %self.topic, step = clock.step, uniq_id = %ready.value.uniq_id, "block committed");
                        clock.advance();
                        applied.push(ready);
                    }
                    Err(e) => {
                        error!(topic = %self.topic, step = clock.step, error = %e, "block could not be applied");
                        failure = Some(PartageError::CommitApply {
                            step: clock.step,
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }

            let rebroadcast = !applied.is_empty() && !clock.has_broadcasted(step);
            if rebroadcast {
                clock.mark_broadcasted(step);
            }
            // Older steps are stale to both accept and tlc handling from here on.
            clock.prune_broadcasted();
            rebroadcast
        };

        if rebroadcast {
            self.transport
                .broadcast(self.wrap(PaxosMessage::Tlc { step, block }).into());
        }
        for block in applied {
            self.inbox.tick(block);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
