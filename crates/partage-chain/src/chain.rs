//! Chain persistence, loading and verification
//!
//! A chain store holds every block under the hex of its hash, plus the raw
//! hash of the newest block under [`LAST_BLOCK_KEY`].

use tracing::debug;

use partage_core::{PartageError, PartageResult};

use crate::{BlockHash, BlockchainBlock, Store};

/// Key of the head pointer in a chain store
pub const LAST_BLOCK_KEY: &str = "last_block";

/// Newest block of the chain, if any
pub fn last_block(store: &dyn Store) -> PartageResult<Option<BlockchainBlock>> {
    let Some(head) = store.get(LAST_BLOCK_KEY) else {
        return Ok(None);
    };
    let head = BlockHash::from_slice(&head)?;
    get_block(store, &head).map(Some)
}

/// Hash the next block must link to
pub fn head_hash(store: &dyn Store) -> PartageResult<BlockHash> {
    match store.get(LAST_BLOCK_KEY) {
        Some(head) => BlockHash::from_slice(&head),
        None => Ok(BlockHash::ZERO),
    }
}

/// Look a block up by hash
pub fn get_block(store: &dyn Store, hash: &BlockHash) -> PartageResult<BlockchainBlock> {
    let bytes = store.get(&hash.to_hex()).ok_or_else(|| {
        PartageError::StorageError(format!("missing block {}", hash.to_hex()))
    })?;
    BlockchainBlock::from_bytes(&bytes)
}

/// Persist a block and move the head pointer to it
pub fn append_block(store: &dyn Store, block: &BlockchainBlock) -> PartageResult<()> {
    store.set(&block.hash.to_hex(), block.to_bytes()?)?;
    store.set(LAST_BLOCK_KEY, block.hash.as_bytes().to_vec())?;
    debug!(index = block.index, hash = %block.hash, "block appended");
    Ok(())
}

/// Walk the chain from the head back to genesis, returned oldest first
pub fn load_blockchain(store: &dyn Store) -> PartageResult<Vec<BlockchainBlock>> {
    let mut blocks = Vec::new();
    let mut cursor = head_hash(store)?;

    while !cursor.is_zero() {
        // A cycle can only come from a corrupted store.
        if blocks.len() > store.len() {
            return Err(PartageError::ChainIntegrity {
                index: blocks.len() as u64,
                reason: "chain does not terminate".into(),
            });
        }
        let block = get_block(store, &cursor)?;
        cursor = block.prev_hash;
        blocks.push(block);
    }

    blocks.reverse();
    Ok(blocks)
}

/// Check hashes and linkage of a chain ordered oldest first
pub fn verify_chain(blocks: &[BlockchainBlock]) -> PartageResult<()> {
    let mut prev = BlockHash::ZERO;
    for block in blocks {
        if block.prev_hash != prev {
            return Err(PartageError::ChainIntegrity {
                index: block.index,
                reason: format!("prev hash {} does not match {}", block.prev_hash, prev),
            });
        }
        if !block.is_hash_valid() {
            return Err(PartageError::ChainIntegrity {
                index: block.index,
                reason: "hash does not match contents".into(),
            });
        }
        prev = block.hash;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, PaxosValue};

    fn build_chain(store: &dyn Store, len: u64) -> Vec<BlockchainBlock> {
        let mut blocks = Vec::new();
        for i in 0..len {
            let prev = head_hash(store).unwrap();
            let block = BlockchainBlock::new(i, PaxosValue::with_id(format!("v{}", i), vec![i as u8]), prev);
            append_block(store, &block).unwrap();
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn test_empty_store_has_zero_head() {
        let store = MemoryStore::new();
        assert_eq!(head_hash(&store).unwrap(), BlockHash::ZERO);
        assert!(last_block(&store).unwrap().is_none());
        assert!(load_blockchain(&store).unwrap().is_empty());
    }

    #[test]
    fn test_load_returns_oldest_first() {
        let store = MemoryStore::new();
        let built = build_chain(&store, 4);
        let loaded = load_blockchain(&store).unwrap();
        assert_eq!(loaded, built);
        assert!(verify_chain(&loaded).is_ok());
        assert_eq!(last_block(&store).unwrap().unwrap().index, 3);
    }

    #[test]
    fn test_verify_detects_broken_link() {
        let store = MemoryStore::new();
        let mut blocks = build_chain(&store, 3);
        blocks.remove(1);
        let err = verify_chain(&blocks).unwrap_err();
        assert!(matches!(err, PartageError::ChainIntegrity { index: 2, .. }));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let store = MemoryStore::new();
        let mut blocks = build_chain(&store, 2);
        blocks[0].value.payload = b"tampered".to_vec();
        assert!(matches!(
            verify_chain(&blocks),
            Err(PartageError::ChainIntegrity { index: 0, .. })
        ));
    }

    #[test]
    fn test_missing_block_is_storage_error() {
        let store = MemoryStore::new();
        let blocks = build_chain(&store, 2);
        store.delete(&blocks[0].hash.to_hex());
        assert!(matches!(
            load_blockchain(&store),
            Err(PartageError::StorageError(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn test_any_appended_chain_loads_and_verifies(
            payloads in proptest::collection::vec(proptest::collection::vec(0u8..=255, 0..16), 0..12),
        ) {
            let store = MemoryStore::new();
            for (i, payload) in payloads.iter().enumerate() {
                let prev = head_hash(&store).unwrap();
                let block = BlockchainBlock::new(i as u64, PaxosValue::new(payload.clone()), prev);
                append_block(&store, &block).unwrap();
            }
            let loaded = load_blockchain(&store).unwrap();
            proptest::prop_assert_eq!(loaded.len(), payloads.len());
            proptest::prop_assert!(verify_chain(&loaded).is_ok());
            for (block, payload) in loaded.iter().zip(&payloads) {
                proptest::prop_assert_eq!(&block.value.payload, payload);
            }
        }
    }
}
