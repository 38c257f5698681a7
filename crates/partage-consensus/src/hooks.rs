//! Per-topic block generation, application and proposal checks

use std::sync::Arc;

use tracing::debug;

use partage_chain::{
    append_block, head_hash, BlockchainBlock, NameRecord, PaxosValue, Store,
};
use partage_core::{PartageError, PartageResult};

/// Plugins tying a paxos instance to its chain
pub trait BlockchainHooks: Send + Sync {
    /// Build the block committing `value` at `step`, chained off the last
    /// persisted block
    fn generate_block(&self, step: u64, value: &PaxosValue) -> PartageResult<BlockchainBlock>;

    /// Persist a committed block
    fn apply_block(&self, block: &BlockchainBlock) -> PartageResult<()>;

    /// Whether an acceptor may accept `value`
    fn check_proposal(&self, _step: u64, _value: &PaxosValue) -> bool {
        true
    }
}

type ProposalCheck = dyn Fn(u64, &PaxosValue) -> bool + Send + Sync;

/// Appends blocks to a chain store
pub struct ChainHooks {
    store: Arc<dyn Store>,
    checker: Option<Box<ProposalCheck>>,
}

impl ChainHooks {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ChainHooks {
            store,
            checker: None,
        }
    }

    /// Refuse proposals for which `checker` returns false
    pub fn with_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(u64, &PaxosValue) -> bool + Send + Sync + 'static,
    {
        self.checker = Some(Box::new(checker));
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

impl BlockchainHooks for ChainHooks {
    fn generate_block(&self, step: u64, value: &PaxosValue) -> PartageResult<BlockchainBlock> {
        let prev = head_hash(self.store.as_ref())?;
        Ok(BlockchainBlock::new(step, value.clone(), prev))
    }

    fn apply_block(&self, block: &BlockchainBlock) -> PartageResult<()> {
        let head = head_hash(self.store.as_ref())?;
        if block.prev_hash != head {
            return Err(PartageError::ChainIntegrity {
                index: block.index,
                reason: format!("block links to {} but head is {}", block.prev_hash, head),
            });
        }
        if !block.is_hash_valid() {
            return Err(PartageError::ChainIntegrity {
                index: block.index,
                reason: "hash does not match contents".into(),
            });
        }
        append_block(self.store.as_ref(), block)
    }

    fn check_proposal(&self, step: u64, value: &PaxosValue) -> bool {
        self.checker.as_ref().map_or(true, |check| check(step, value))
    }
}

/// Naming chain: values are filename to metahash records
pub struct NamingChain {
    chain: ChainHooks,
    names: Arc<dyn Store>,
}

impl NamingChain {
    pub fn new(blockchain: Arc<dyn Store>, names: Arc<dyn Store>) -> Self {
        NamingChain {
            chain: ChainHooks::new(blockchain),
            names,
        }
    }
}

impl BlockchainHooks for NamingChain {
    fn generate_block(&self, step: u64, value: &PaxosValue) -> PartageResult<BlockchainBlock> {
        self.chain.generate_block(step, value)
    }

    fn apply_block(&self, block: &BlockchainBlock) -> PartageResult<()> {
        let record = NameRecord::from_value(&block.value)?;
        self.chain.apply_block(block)?;
        self.names
            .set(&record.filename, record.metahash.clone().into_bytes())?;
        debug!(filename = %record.filename, metahash = %record.metahash, "name committed");
        Ok(())
    }

    fn check_proposal(&self, _step: u64, value: &PaxosValue) -> bool {
        NameRecord::from_value(value).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partage_chain::{load_blockchain, verify_chain, MemoryStore};

    #[test]
    fn test_generate_and_apply_chain() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hooks = ChainHooks::new(store.clone());

        for step in 0..3 {
            let block = hooks
                .generate_block(step, &PaxosValue::with_id(format!("v{}", step), vec![]))
                .unwrap();
            hooks.apply_block(&block).unwrap();
        }

        let chain = load_blockchain(store.as_ref()).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(verify_chain(&chain).is_ok());
    }

    #[test]
    fn test_apply_rejects_wrong_link() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hooks = ChainHooks::new(store);
        let first = hooks.generate_block(0, &PaxosValue::with_id("a", vec![])).unwrap();
        hooks.apply_block(&first).unwrap();

        // Generated against an empty chain, so it links to the zero hash.
        let stale = BlockchainBlock::new(1, PaxosValue::with_id("b", vec![]), partage_chain::BlockHash::ZERO);
        assert!(matches!(
            hooks.apply_block(&stale),
            Err(PartageError::ChainIntegrity { index: 1, .. })
        ));
    }

    #[test]
    fn test_apply_fails_on_storage_error() {
        let store = Arc::new(MemoryStore::new());
        let hooks = ChainHooks::new(store.clone());
        let block = hooks.generate_block(0, &PaxosValue::with_id("a", vec![])).unwrap();
        store.set_read_only(true);
        assert!(matches!(
            hooks.apply_block(&block),
            Err(PartageError::StorageError(_))
        ));
    }

    #[test]
    fn test_checker() {
        let hooks = ChainHooks::new(Arc::new(MemoryStore::new()))
            .with_checker(|_, value| value.payload != b"bad");
        assert!(hooks.check_proposal(0, &PaxosValue::with_id("a", b"good".to_vec())));
        assert!(!hooks.check_proposal(0, &PaxosValue::with_id("b", b"bad".to_vec())));
    }

    #[test]
    fn test_naming_chain_writes_names() {
        let names: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hooks = NamingChain::new(Arc::new(MemoryStore::new()), names.clone());

        let value = NameRecord::new("a.txt", "f00d").to_value().unwrap();
        assert!(hooks.check_proposal(0, &value));
        let block = hooks.generate_block(0, &value).unwrap();
        hooks.apply_block(&block).unwrap();
        assert_eq!(names.get("a.txt"), Some(b"f00d".to_vec()));

        assert!(!hooks.check_proposal(1, &PaxosValue::with_id("x", b"junk".to_vec())));
    }
}
