//! Per-topic paxos clock
//!
//! INVARIANT: `step` only increases; advancing resets the round state and
//! at most one TLC is broadcast per step.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use partage_chain::{BlockchainBlock, PaxosValue};

/// TLC votes collected for one step; the first block seen is kept
#[derive(Clone, Debug)]
pub struct TlcProgress {
    pub block: BlockchainBlock,
    pub votes: usize,
}

/// Round state of one topic on one peer
#[derive(Debug, Default)]
pub struct Clock {
    pub step: u64,
    /// Highest proposal id promised at this step
    pub max_id: u64,
    pub accepted_id: u64,
    pub accepted_value: Option<PaxosValue>,
    /// Accept messages seen per value unique id
    pub acceptance_progress: HashMap<String, usize>,
    pub tlc_progress: BTreeMap<u64, TlcProgress>,
    pub tlc_broadcasted: BTreeSet<u64>,
}

impl Clock {
    pub fn new() -> Self {
        Clock::default()
    }

    /// Prepare is stale unless it targets this step with a higher id
    #[inline]
    pub fn should_ignore_prepare(&self, step: u64, id: u64) -> bool {
        step != self.step || id <= self.max_id
    }

    /// Propose and accept must match this step and the promised id
    #[inline]
    pub fn should_ignore_propose(&self, step: u64, id: u64) -> bool {
        step != self.step || id != self.max_id
    }

    pub fn update_max_id(&mut self, id: u64) {
        if id > self.max_id {
            self.max_id = id;
        }
    }

    pub fn accept(&mut self, id: u64, value: PaxosValue) {
        self.accepted_id = id;
        self.accepted_value = Some(value);
    }

    /// Count one accept for `uniq_id`; true once `threshold` is reached
    pub fn notify_acceptance(&mut self, uniq_id: &str, threshold: usize) -> bool {
        let count = self
            .acceptance_progress
            .entry(uniq_id.to_string())
            .or_insert(0);
        *count += 1;
        *count >= threshold
    }

    /// Count one TLC vote for `step`
    pub fn notify_tlc(&mut self, step: u64, block: BlockchainBlock) -> usize {
        let progress = self
            .tlc_progress
            .entry(step)
            .or_insert(TlcProgress { block, votes: 0 });
        progress.votes += 1;
        progress.votes
    }

    /// Block of the current step once it gathered `threshold` votes
    pub fn ready_block(&self, threshold: usize) -> Option<&BlockchainBlock> {
        self.tlc_progress
            .get(&self.step)
            .filter(|p| p.votes >= threshold)
            .map(|p| &p.block)
    }

    pub fn has_broadcasted(&self, step: u64) -> bool {
        self.tlc_broadcasted.contains(&step)
    }

    pub fn mark_broadcasted(&mut self, step: u64) {
        self.tlc_broadcasted.insert(step);
    }

    pub fn unmark_broadcasted(&mut self, step: u64) {
        self.tlc_broadcasted.remove(&step);
    }

    /// Forget broadcast marks of steps already behind the clock.
    ///
    /// Only safe once no TLC of an older step will be considered again.
    pub fn prune_broadcasted(&mut self) {
        let step = self.step;
        self.tlc_broadcasted.retain(|s| *s >= step);
    }

    /// Move to the next step and reset the round state.
    ///
    /// Broadcast marks survive; see [`Clock::prune_broadcasted`].
    pub fn advance(&mut self) {
        self.tlc_progress.remove(&self.step);
        self.step += 1;
        self.max_id = 0;
        self.accepted_id = 0;
        self.accepted_value = None;
        self.acceptance_progress.clear();
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[step={}, max_id={}]", self.step, self.max_id)
    }
}
