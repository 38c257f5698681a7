//! Peer configuration and quorum arithmetic

use std::time::Duration;

use crate::{PartageError, PartageResult};

/// Default majority threshold: `⌊n/2⌋ + 1`
pub fn majority_threshold(total_peers: u32) -> usize {
    (total_peers / 2 + 1) as usize
}

/// Whether any two quorums of size `threshold` out of `total_peers` intersect
#[inline]
pub fn is_quorum_safe(threshold: usize, total_peers: u32) -> bool {
    2 * threshold > total_peers as usize
}

/// How long a committed proposer waits for its step to be applied locally.
///
/// A tick carrying someone else's value always restarts the round at once;
/// this only bounds the wait when no tick arrives at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitWaitPolicy {
    /// Proposer retry intervals to wait for the tick before restarting
    pub tick_waits: u32,
}

impl Default for CommitWaitPolicy {
    fn default() -> Self {
        CommitWaitPolicy { tick_waits: 1 }
    }
}

/// Peer configuration, consumed opaquely by gossip and consensus
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Number of peers taking part in consensus
    pub total_peers: u32,
    /// This peer's ballot offset; proposal ids are `paxos_id + k * total_peers`
    pub paxos_id: u64,
    /// Quorum size as a function of `total_peers`
    pub paxos_threshold: fn(u32) -> usize,
    /// Bound on every proposer wait (promises, accepts, commit tick)
    pub proposer_retry: Duration,
    /// Period of unsolicited status exchange; zero disables it
    pub anti_entropy_interval: Duration,
    /// Period of empty heartbeat rumors; zero disables it
    pub heartbeat_interval: Duration,
    /// How long to wait for a rumor ack; zero means fire-and-forget
    pub ack_timeout: Duration,
    /// Probability of relaying a converged status to another neighbor
    pub continue_mongering: f64,
    pub commit_wait: CommitWaitPolicy,
    /// Correlation ids kept in each rendezvous cache before eviction
    pub rendezvous_cache: usize,
    /// Hop limit for relayed packets
    pub packet_ttl: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            total_peers: 1,
            paxos_id: 1,
            paxos_threshold: majority_threshold,
            proposer_retry: Duration::from_secs(5),
            anti_entropy_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(3),
            continue_mongering: 0.5,
            commit_wait: CommitWaitPolicy::default(),
            rendezvous_cache: 1024,
            packet_ttl: 64,
        }
    }
}

impl PeerConfig {
    /// Quorum size for the configured number of peers
    pub fn threshold(&self) -> usize {
        (self.paxos_threshold)(self.total_peers)
    }

    /// Consensus needs at least two peers
    pub fn consensus_enabled(&self) -> bool {
        self.total_peers > 1
    }

    /// Check the configuration for structural errors
    pub fn validate(&self) -> PartageResult<()> {
        if !(0.0..=1.0).contains(&self.continue_mongering) {
            return Err(PartageError::InvalidConfig(format!(
                "continue_mongering must be in [0, 1], got {}",
                self.continue_mongering
            )));
        }
        if self.paxos_id == 0 {
            return Err(PartageError::InvalidConfig(
                "paxos_id must be at least 1".into(),
            ));
        }
        if self.proposer_retry.is_zero() {
            return Err(PartageError::InvalidConfig(
                "proposer_retry must be positive".into(),
            ));
        }
        if self.commit_wait.tick_waits == 0 {
            return Err(PartageError::InvalidConfig(
                "commit_wait.tick_waits must be at least 1".into(),
            ));
        }
        if self.rendezvous_cache == 0 {
            return Err(PartageError::InvalidConfig(
                "rendezvous_cache must be at least 1".into(),
            ));
        }
        if self.consensus_enabled() {
            let threshold = self.threshold();
            if threshold > self.total_peers as usize {
                return Err(PartageError::InvalidConfig(format!(
                    "threshold {} exceeds {} peers",
                    threshold, self.total_peers
                )));
            }
            if !is_quorum_safe(threshold, self.total_peers) {
                return Err(PartageError::InvalidConfig(format!(
                    "threshold {} does not form a majority of {} peers",
                    threshold, self.total_peers
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_majority_threshold_values() {
        assert_eq!(majority_threshold(1), 1);
        assert_eq!(majority_threshold(2), 2);
        assert_eq!(majority_threshold(3), 2);
        assert_eq!(majority_threshold(4), 3);
        assert_eq!(majority_threshold(5), 3);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PeerConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.consensus_enabled());
    }

    #[test]
    fn test_rejects_bad_mongering() {
        let config = PeerConfig {
            continue_mongering: 1.5,
            ..PeerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PartageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_minority_threshold() {
        fn one(_: u32) -> usize {
            1
        }
        let config = PeerConfig {
            total_peers: 4,
            paxos_threshold: one,
            ..PeerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_majority_is_quorum_safe(n in 2u32..10_000) {
            let t = majority_threshold(n);
            prop_assert!(is_quorum_safe(t, n));
            prop_assert!(t <= n as usize);
        }
    }
}
