//! Peer count and threshold of a topic

use std::sync::atomic::{AtomicU32, Ordering};

use partage_core::{is_quorum_safe, PeerConfig};

/// Current system size and the rule turning it into a threshold
#[derive(Debug)]
pub struct Quorum {
    total_peers: AtomicU32,
    threshold_fn: fn(u32) -> usize,
}

impl Quorum {
    pub fn new(total_peers: u32, threshold_fn: fn(u32) -> usize) -> Self {
        Quorum {
            total_peers: AtomicU32::new(total_peers),
            threshold_fn,
        }
    }

    pub fn from_config(config: &PeerConfig) -> Self {
        Quorum::new(config.total_peers, config.paxos_threshold)
    }

    #[inline]
    pub fn total_peers(&self) -> u32 {
        self.total_peers.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        (self.threshold_fn)(self.total_peers())
    }

    /// Whether two thresholds out of the current peers always intersect
    pub fn is_safe(&self) -> bool {
        is_quorum_safe(self.threshold(), self.total_peers())
    }

    pub(crate) fn set_total_peers(&self, total_peers: u32) {
        self.total_peers.store(total_peers, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partage_core::majority_threshold;

    #[test]
    fn test_threshold_follows_size() {
        let quorum = Quorum::new(3, majority_threshold);
        assert_eq!(quorum.threshold(), 2);
        assert!(quorum.is_safe());
        quorum.set_total_peers(5);
        assert_eq!(quorum.threshold(), 3);
    }
}
