//! Per-origin FIFO processing of accepted rumors

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use partage_core::NodeAddr;

/// Lets rumor `n` of an origin run only after rumor `n - 1` finished
#[derive(Debug, Default)]
pub struct DeliverySequencer {
    processed: Mutex<HashMap<NodeAddr, watch::Sender<u64>>>,
}

impl DeliverySequencer {
    pub fn new() -> Self {
        DeliverySequencer::default()
    }

    /// Wait until every rumor of `origin` before `seq` has been processed
    pub async fn wait_turn(&self, origin: &NodeAddr, seq: u64) {
        let mut rx = {
            let mut processed = self.processed.lock();
            processed
                .entry(origin.clone())
                .or_insert_with(|| watch::channel(0).0)
                .subscribe()
        };
        // The sender lives in the map for the life of the sequencer.
        let _ = rx.wait_for(|done| *done + 1 >= seq).await;
    }

    /// Mark rumor `seq` of `origin` as processed
    pub fn complete(&self, origin: &NodeAddr, seq: u64) {
        let mut processed = self.processed.lock();
        let tx = processed
            .entry(origin.clone())
            .or_insert_with(|| watch::channel(0).0);
        tx.send_if_modified(|done| {
            if seq > *done {
                *done = seq;
                true
            } else {
                false
            }
        });
    }

    /// Last processed sequence of `origin`
    pub fn processed(&self, origin: &NodeAddr) -> u64 {
        self.processed
            .lock()
            .get(origin)
            .map_or(0, |tx| *tx.borrow())
    }
}
