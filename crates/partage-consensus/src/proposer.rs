//! Proposer state machine
//!
//! ```text
//! Idle -> Begin -> WaitPromise -> WaitAccept -> Done -> Committed
//!           ^          |              |  |        |
//!           +----------+--------------+  |        |
//!           +----------------------------+--------+
//!                                        +-> Rejected
//! ```
//!
//! Every wait is bounded by the proposer retry interval. A failed round goes
//! back to Begin with the caller's original value; the only ways out are
//! `Committed` and `Rejected`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use partage_chain::{BlockchainBlock, PaxosValue};
use partage_core::{CommitWaitPolicy, PartageError, PartageResult, ProtocolId};
use partage_rendezvous::ResponseBroker;
use partage_wire::{ConsensusMessage, PaxosMessage};

use crate::{Clock, ConsensusTransport, Quorum};

/// Observable phase of a proposer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProposerPhase {
    Idle,
    Begin,
    WaitPromise,
    WaitAccept,
    Done,
    Committed,
    Rejected,
}

/// Every transition the proposer may take
pub const TRANSITIONS: &[(ProposerPhase, ProposerPhase)] = &[
    (ProposerPhase::Idle, ProposerPhase::Begin),
    (ProposerPhase::Committed, ProposerPhase::Begin),
    (ProposerPhase::Rejected, ProposerPhase::Begin),
    (ProposerPhase::Begin, ProposerPhase::WaitPromise),
    (ProposerPhase::WaitPromise, ProposerPhase::Begin),
    (ProposerPhase::WaitPromise, ProposerPhase::WaitAccept),
    (ProposerPhase::WaitAccept, ProposerPhase::Begin),
    (ProposerPhase::WaitAccept, ProposerPhase::Done),
    (ProposerPhase::WaitAccept, ProposerPhase::Rejected),
    (ProposerPhase::Done, ProposerPhase::Begin),
    (ProposerPhase::Done, ProposerPhase::Committed),
];

impl ProposerPhase {
    pub fn can_transition_to(self, next: ProposerPhase) -> bool {
        TRANSITIONS.contains(&(self, next))
    }

    /// Whether a proposal has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, ProposerPhase::Committed | ProposerPhase::Rejected)
    }
}

/// What an acceptor answered to a prepare
#[derive(Clone, Debug)]
pub struct PromiseReply {
    pub accepted_id: u64,
    pub accepted_value: Option<PaxosValue>,
}

/// What an acceptor answered to a propose
#[derive(Clone, Debug)]
pub enum AcceptReply {
    Accepted(PaxosValue),
    Rejected(PaxosValue),
}

/// Replies routed to the local proposer
pub struct ProposerInbox {
    /// Id of the proposal in flight, zero when idle
    in_flight: AtomicU64,
    pub promises: ResponseBroker<u64, PromiseReply>,
    pub accepts: ResponseBroker<u64, AcceptReply>,
    /// Blocks applied locally, keyed by step
    pub ticks: ResponseBroker<u64, BlockchainBlock>,
}

impl ProposerInbox {
    pub fn new(cache: usize) -> Self {
        ProposerInbox {
            in_flight: AtomicU64::new(0),
            promises: ResponseBroker::new(cache),
            accepts: ResponseBroker::new(cache),
            ticks: ResponseBroker::new(cache),
        }
    }

    #[inline]
    fn is_in_flight(&self, id: u64) -> bool {
        id != 0 && self.in_flight.load(Ordering::SeqCst) == id
    }

    pub fn offer_promise(&self, id: u64, reply: PromiseReply) {
        if self.is_in_flight(id) {
            self.promises.dispatch(id, reply);
        }
    }

    pub fn offer_accept(&self, id: u64, reply: AcceptReply) {
        if self.is_in_flight(id) {
            self.accepts.dispatch(id, reply);
        }
    }

    pub fn tick(&self, block: BlockchainBlock) {
        self.ticks.dispatch(block.index, block);
    }
}

enum State {
    Begin,
    WaitPromise { step: u64, id: u64 },
    WaitAccept { step: u64, id: u64, chosen: PaxosValue },
    Done { step: u64, chosen: PaxosValue },
}

impl State {
    fn phase(&self) -> ProposerPhase {
        match self {
            State::Begin => ProposerPhase::Begin,
            State::WaitPromise { .. } => ProposerPhase::WaitPromise,
            State::WaitAccept { .. } => ProposerPhase::WaitAccept,
            State::Done { .. } => ProposerPhase::Done,
        }
    }
}

/// Proposer of one topic on one peer
pub struct Proposer {
    topic: ProtocolId,
    clock: Arc<Mutex<Clock>>,
    quorum: Arc<Quorum>,
    inbox: Arc<ProposerInbox>,
    transport: Arc<dyn ConsensusTransport>,
    retry: Duration,
    commit_wait: CommitWaitPolicy,
    last_proposal_id: Mutex<u64>,
    phase: watch::Sender<ProposerPhase>,
}

impl Proposer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: ProtocolId,
        paxos_id: u64,
        clock: Arc<Mutex<Clock>>,
        quorum: Arc<Quorum>,
        inbox: Arc<ProposerInbox>,
        transport: Arc<dyn ConsensusTransport>,
        retry: Duration,
        commit_wait: CommitWaitPolicy,
    ) -> Self {
        Proposer {
            topic,
            clock,
            quorum,
            inbox,
            transport,
            retry,
            commit_wait,
            last_proposal_id: Mutex::new(paxos_id),
            phase: watch::channel(ProposerPhase::Idle).0,
        }
    }

    /// Follow the proposer's phase changes
    pub fn subscribe(&self) -> watch::Receiver<ProposerPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> ProposerPhase {
        *self.phase.borrow()
    }

    pub fn last_proposal_id(&self) -> u64 {
        *self.last_proposal_id.lock()
    }

    fn enter(&self, next: ProposerPhase) {
        let current = self.phase();
        debug_assert!(
            current == next || current.can_transition_to(next),
            "invalid proposer transition {:?} -> {:?}",
            current,
            next
        );
        trace!(topic = %self.topic, from = ?current, to = ?next, "proposer transition");
        self.phase.send_replace(next);
    }

    /// Drive one proposal to commitment.
    ///
    /// Returns the committed block holding `value`, or `ProposalRejected`
    /// when a threshold of acceptors refused it.
    pub async fn run(&self, value: PaxosValue) -> PartageResult<BlockchainBlock> {
        let _in_flight = InFlightGuard(&self.inbox);
        let mut state = State::Begin;
        self.enter(ProposerPhase::Begin);

        loop {
            state = match state {
                State::Begin => self.begin(),
                State::WaitPromise { step, id } => self.wait_promise(step, id, &value).await,
                State::WaitAccept { step, id, chosen } => {
                    match self.wait_accept(step, id, chosen).await {
                        Ok(next) => next,
                        Err(e) => {
                            self.enter(ProposerPhase::Rejected);
                            return Err(e);
                        }
                    }
                }
                State::Done { step, chosen } => match self.wait_commit(step, &chosen, &value).await {
                    Some(block) => {
                        info!(topic = %self.topic, step, uniq_id = %value.uniq_id, "proposal committed");
                        self.enter(ProposerPhase::Committed);
                        return Ok(block);
                    }
                    None => State::Begin,
                },
            };
            self.enter(state.phase());
        }
    }

    fn begin(&self) -> State {
        let total = u64::from(self.quorum.total_peers().max(1));
        let clock = self.clock.lock();
        let mut last = self.last_proposal_id.lock();
        while *last < clock.max_id {
            *last += total;
        }
        let id = *last;
        *last += total;
        let step = clock.step;
        drop(clock);

        self.inbox.in_flight.store(id, Ordering::SeqCst);
        debug!(topic = %self.topic, step, id, "proposing");
        State::WaitPromise { step, id }
    }

    async fn wait_promise(&self, step: u64, id: u64, original: &PaxosValue) -> State {
        let source = self.transport.local_addr();
        self.send(PaxosMessage::Prepare { step, id, source });

        let threshold = self.quorum.threshold();
        let promises = self
            .inbox
            .promises
            .collect(id, self.retry, Some(threshold))
            .await;

        if promises.len() < threshold {
            debug!(topic = %self.topic, step, id, got = promises.len(), threshold, "not enough promises");
            return State::Begin;
        }

        let adopted = promises
            .into_iter()
            .filter_map(|p| p.accepted_value.map(|v| (p.accepted_id, v)))
            .max_by_key(|(accepted_id, _)| *accepted_id)
            .map(|(_, v)| v);
        let chosen = match adopted {
            Some(v) => {
                if v.uniq_id != original.uniq_id {
                    debug!(topic = %self.topic, step, id, adopted = %v.uniq_id, "adopting accepted value");
                }
                v
            }
            None => original.clone(),
        };
        State::WaitAccept { step, id, chosen }
    }

    async fn wait_accept(&self, step: u64, id: u64, chosen: PaxosValue) -> PartageResult<State> {
        self.send(PaxosMessage::Propose {
            step,
            id,
            value: chosen.clone(),
            source: self.transport.local_addr(),
        });

        let threshold = self.quorum.threshold();
        let uniq_id = chosen.uniq_id.clone();
        let tally = |replies: &[AcceptReply]| {
            replies.iter().fold((0usize, 0usize), |(acc, rej), reply| match reply {
                AcceptReply::Accepted(v) if v.uniq_id == uniq_id => (acc + 1, rej),
                AcceptReply::Rejected(v) if v.uniq_id == uniq_id => (acc, rej + 1),
                _ => (acc, rej),
            })
        };

        let replies = self
            .inbox
            .accepts
            .collect_until(id, self.retry, threshold.max(1) * 2, |replies| {
                let (acc, rej) = tally(replies);
                acc >= threshold || rej >= threshold
            })
            .await;
        let (accepts, rejects) = tally(&replies);

        if accepts >= threshold {
            return Ok(State::Done { step, chosen });
        }
        if rejects >= threshold {
            info!(topic = %self.topic, step, id, rejects, "proposal rejected");
            return Err(PartageError::ProposalRejected { uniq_id, rejects });
        }
        debug!(topic = %self.topic, step, id, accepts, threshold, "not enough accepts");
        Ok(State::Begin)
    }

    async fn wait_commit(&self, step: u64, chosen: &PaxosValue, original: &PaxosValue) -> Option<BlockchainBlock> {
        let wait = self.retry * self.commit_wait.tick_waits.max(1);
        match self.inbox.ticks.collect_one(step, wait).await {
            None => {
                debug!(topic = %self.topic, step, "no tick, retrying");
                None
            }
            Some(block) if block.value.uniq_id == original.uniq_id => Some(block),
            Some(block) => {
                debug!(
                    topic = %self.topic,
                    step,
                    chosen = %chosen.uniq_id,
                    committed = %block.value.uniq_id,
                    "step committed another value, retrying"
                );
                None
            }
        }
    }

    fn send(&self, inner: PaxosMessage) {
        let msg = ConsensusMessage::new(self.topic.clone(), inner);
        self.transport.broadcast(msg.into());
    }

    /// Move the id progression from `old` to `new` peers.
    ///
    /// Ids are `paxos_id + k * total`; the number of ids already used, `k`,
    /// is kept.
    pub(crate) fn rebase(&self, old: u32, new: u32) {
        let mut last = self.last_proposal_id.lock();
        let old = u64::from(old.max(1));
        if *last > old {
            let used = (*last - 1) / old;
            *last += u64::from(new).saturating_sub(old) * used;
        }
    }
}

/// Clears the in-flight id when a proposal ends or is abandoned
struct InFlightGuard<'a>(&'a ProposerInbox);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(0, Ordering::SeqCst);
    }
}
