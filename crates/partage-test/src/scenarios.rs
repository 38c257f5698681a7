//! End-to-end protocol scenarios over a [`Cluster`]

use std::time::Duration;

use futures::future::join_all;

use partage_chain::PaxosValue;
use partage_core::PartageResult;

use crate::{check_chains, Cluster, ClusterConfig, ConsensusReport};

/// Generous bound on virtual time for a scenario to settle
pub const SETTLE: Duration = Duration::from_secs(30);

/// Every node proposes one value on `topic` at once; returns the report once
/// all of them committed everywhere.
pub async fn run_concurrent_proposals(config: ClusterConfig, topic: &str) -> PartageResult<ConsensusReport> {
    let cluster = Cluster::start(config)?;
    cluster.register_chain(topic)?;

    let proposals = cluster.nodes().iter().enumerate().map(|(i, node)| {
        let value = PaxosValue::with_id(format!("v{}", i), vec![i as u8]);
        node.propose(topic, value)
    });
    for result in join_all(proposals).await {
        result?;
    }

    cluster.wait_for_all(topic, cluster.len() as u64, SETTLE).await;
    let report = check_chains(&cluster.chains(topic)?).with_tlc_counts(&cluster.tlc_broadcasts(topic));
    cluster.stop().await;
    Ok(report)
}
