//! Safety checks over the chains of a cluster

use std::collections::{BTreeMap, HashSet};

use partage_chain::{verify_chain, BlockchainBlock};

/// Outcome of checking one topic across all nodes
#[derive(Debug, Clone, Default)]
pub struct ConsensusReport {
    /// Chain length per node
    pub lengths: Vec<usize>,

    /// Every pair of nodes holds the same block at every common index
    pub agreement: bool,

    /// Every chain verifies end to end
    pub integrity: bool,

    /// No value was committed twice on one chain
    pub no_duplicates: bool,

    /// No node broadcast more than one TLC for a step
    pub single_tlc: bool,

    pub violations: Vec<String>,
}

impl ConsensusReport {
    pub fn passed(&self) -> bool {
        self.agreement && self.integrity && self.no_duplicates && self.single_tlc
    }

    /// Fold in per-node TLC broadcast counts, as returned by
    /// `Cluster::tlc_broadcasts`
    pub fn with_tlc_counts(mut self, counts: &[BTreeMap<u64, usize>]) -> Self {
        for (node, steps) in counts.iter().enumerate() {
            for (step, &sent) in steps {
                if sent > 1 {
                    self.single_tlc = false;
                    self.violations
                        .push(format!("node {}: {} tlc broadcasts for step {}", node, sent, step));
                }
            }
        }
        self
    }

    /// Shortest chain in the cluster
    pub fn committed(&self) -> usize {
        self.lengths.iter().copied().min().unwrap_or(0)
    }
}

/// Check agreement, integrity and idempotence of per-node chains
pub fn check_chains(chains: &[Vec<BlockchainBlock>]) -> ConsensusReport {
    let mut report = ConsensusReport {
        lengths: chains.iter().map(Vec::len).collect(),
        agreement: true,
        integrity: true,
        no_duplicates: true,
        single_tlc: true,
        violations: Vec::new(),
    };

    for (node, chain) in chains.iter().enumerate() {
        if let Err(e) = verify_chain(chain) {
            report.integrity = false;
            report.violations.push(format!("node {}: {}", node, e));
        }

        let mut seen = HashSet::new();
        for block in chain {
            if !seen.insert(block.value.uniq_id.as_str()) {
                report.no_duplicates = false;
                report.violations.push(format!(
                    "node {}: value {} committed twice",
                    node, block.value.uniq_id
                ));
            }
        }
    }

    if let Some((reference, rest)) = chains.split_first() {
        for (offset, chain) in rest.iter().enumerate() {
            for (a, b) in reference.iter().zip(chain) {
                if a.hash != b.hash {
                    report.agreement = false;
                    report.violations.push(format!(
                        "nodes 0 and {} disagree at index {}",
                        offset + 1,
                        a.index
                    ));
                    break;
                }
            }
        }
    }

    report
}
