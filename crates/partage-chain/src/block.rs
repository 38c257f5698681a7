//! Hash-chained blocks

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use partage_core::{PartageError, PartageResult};

use crate::PaxosValue;

/// SHA-256 digest identifying a block
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Predecessor of the first block of every chain
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> PartageResult<Self> {
        let bytes = hex::decode(s).map_err(|e| PartageError::InvalidWireFormat(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> PartageResult<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            PartageError::InvalidWireFormat(format!("block hash must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(BlockHash(arr))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// `SHA256(index ‖ uniq_id ‖ payload ‖ prev_hash)`, index in decimal
pub fn hash_block(index: u64, value: &PaxosValue, prev_hash: &BlockHash) -> BlockHash {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(value.uniq_id.as_bytes());
    hasher.update(&value.payload);
    hasher.update(prev_hash.as_bytes());
    BlockHash(hasher.finalize().into())
}

/// One committed entry of a topic's chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainBlock {
    /// Consensus step this block was committed at
    pub index: u64,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub value: PaxosValue,
}

impl BlockchainBlock {
    /// Build a block and compute its hash
    pub fn new(index: u64, value: PaxosValue, prev_hash: BlockHash) -> Self {
        let hash = hash_block(index, &value, &prev_hash);
        BlockchainBlock {
            index,
            hash,
            prev_hash,
            value,
        }
    }

    /// Recompute the hash and compare with the stored one
    pub fn is_hash_valid(&self) -> bool {
        hash_block(self.index, &self.value, &self.prev_hash) == self.hash
    }

    pub fn to_bytes(&self) -> PartageResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PartageError::StorageError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> PartageResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PartageError::StorageError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(id: &str) -> PaxosValue {
        PaxosValue::with_id(id, b"payload".to_vec())
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let base = hash_block(0, &value("a"), &BlockHash::ZERO);
        assert_ne!(base, hash_block(1, &value("a"), &BlockHash::ZERO));
        assert_ne!(base, hash_block(0, &value("b"), &BlockHash::ZERO));
        assert_ne!(base, hash_block(0, &value("a"), &BlockHash([1u8; 32])));
        assert_ne!(
            base,
            hash_block(0, &PaxosValue::with_id("a", b"other".to_vec()), &BlockHash::ZERO)
        );
    }

    #[test]
    fn test_block_hash_matches_manual_digest() {
        let block = BlockchainBlock::new(7, value("id"), BlockHash::ZERO);

        let mut hasher = Sha256::new();
        hasher.update(b"7");
        hasher.update(b"id");
        hasher.update(b"payload");
        hasher.update([0u8; 32]);
        let expected: [u8; 32] = hasher.finalize().into();

        assert_eq!(block.hash.0, expected);
        assert!(block.is_hash_valid());
    }

    #[test]
    fn test_tampered_block_fails_validation() {
        let mut block = BlockchainBlock::new(0, value("id"), BlockHash::ZERO);
        block.value.payload = b"forged".to_vec();
        assert!(!block.is_hash_valid());
    }

    #[test]
    fn test_block_hash_serializes_as_hex() {
        let block = BlockchainBlock::new(0, value("id"), BlockHash::ZERO);
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(&block.hash.to_hex()));
        assert_eq!(BlockchainBlock::from_bytes(json.as_bytes()).unwrap(), block);
    }

    #[test]
    fn test_block_hash_rejects_short_input() {
        assert!(BlockHash::from_slice(&[1, 2, 3]).is_err());
        assert!(BlockHash::from_hex("zz").is_err());
    }
}
