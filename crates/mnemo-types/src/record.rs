use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::TypeError;
use crate::temporal::Timestamp;

/// Upper bound on key length in bytes.
pub const MAX_KEY_LEN: usize = 1024;

/// One persisted memory: an immutable, key-addressed value.
///
/// A new `persist` of the same key produces a new record; records are never
/// updated in place. The signature is computed by the caller (see
/// `mnemo_crypto::signature`) and travels with the record to every backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Caller-defined record type ("note", "command", ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
    pub value: Vec<u8>,
    pub signature: Digest,
    pub timestamp: Timestamp,
}

impl MemoryRecord {
    pub fn new(
        kind: impl Into<String>,
        key: impl Into<String>,
        value: Vec<u8>,
        signature: Digest,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            value,
            signature,
            timestamp,
        }
    }
}

/// Keys must be non-empty and at most [`MAX_KEY_LEN`] bytes.
pub fn validate_key(key: &str) -> Result<(), TypeError> {
    if key.is_empty() {
        return Err(TypeError::InvalidKey("key is empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(TypeError::InvalidKey(format!(
            "key is {} bytes, limit is {MAX_KEY_LEN}",
            key.len()
        )));
    }
    Ok(())
}

/// Record types must be non-empty.
pub fn validate_kind(kind: &str) -> Result<(), TypeError> {
    if kind.trim().is_empty() {
        return Err(TypeError::InvalidKind("record type is empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryRecord {
        MemoryRecord::new(
            "note",
            "k1",
            b"hello".to_vec(),
            Digest::from_hash([3; 32]),
            Timestamp::new(42, 0),
        )
    }

    #[test]
    fn kind_serializes_as_type() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "note");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn bincode_roundtrip() {
        let rec = sample();
        let bytes = bincode::serialize(&rec).unwrap();
        let back: MemoryRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(validate_key(""), Err(TypeError::InvalidKey(_))));
    }

    #[test]
    fn oversized_key_rejected() {
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(validate_key(&key).is_err());
        assert!(validate_key(&key[..MAX_KEY_LEN]).is_ok());
    }

    #[test]
    fn blank_kind_rejected() {
        assert!(validate_kind("  ").is_err());
        assert!(validate_kind("note").is_ok());
    }
}
