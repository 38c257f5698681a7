//! Values agreed upon by consensus

use serde::{Deserialize, Serialize};

use partage_core::{PartageError, PartageResult};

/// A value proposed to a consensus topic.
///
/// `uniq_id` must be globally unique per proposal: two proposals carrying the
/// same id are indistinguishable to the proposer that waits for its value to
/// be committed. Callers normally obtain one from [`PaxosValue::new`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaxosValue {
    pub uniq_id: String,
    /// Opaque application payload
    pub payload: Vec<u8>,
}

impl PaxosValue {
    /// Create a value with a fresh random unique id
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        PaxosValue {
            uniq_id: format!("{:032x}", rand::random::<u128>()),
            payload: payload.into(),
        }
    }

    /// Create a value with a caller-chosen unique id
    pub fn with_id(uniq_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        PaxosValue {
            uniq_id: uniq_id.into(),
            payload: payload.into(),
        }
    }
}

/// Filename to metahash mapping committed on the naming topic
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    pub filename: String,
    pub metahash: String,
}

impl NameRecord {
    pub fn new(filename: impl Into<String>, metahash: impl Into<String>) -> Self {
        NameRecord {
            filename: filename.into(),
            metahash: metahash.into(),
        }
    }

    /// Wrap the record as a fresh paxos value
    pub fn to_value(&self) -> PartageResult<PaxosValue> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| PartageError::InvalidWireFormat(e.to_string()))?;
        Ok(PaxosValue::new(payload))
    }

    /// Decode a record from a paxos value payload
    pub fn from_value(value: &PaxosValue) -> PartageResult<Self> {
        serde_json::from_slice(&value.payload)
            .map_err(|e| PartageError::InvalidWireFormat(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_values_have_distinct_ids() {
        let a = PaxosValue::new(b"x".to_vec());
        let b = PaxosValue::new(b"x".to_vec());
        assert_ne!(a.uniq_id, b.uniq_id);
        assert_eq!(a.payload, b.payload);
    }

    #[test]
    fn test_name_record_through_value() {
        let record = NameRecord::new("notes.txt", "abcd");
        let value = record.to_value().unwrap();
        assert_eq!(NameRecord::from_value(&value).unwrap(), record);
    }

    #[test]
    fn test_name_record_rejects_garbage() {
        let value = PaxosValue::with_id("x", b"not json".to_vec());
        assert!(NameRecord::from_value(&value).is_err());
    }
}
