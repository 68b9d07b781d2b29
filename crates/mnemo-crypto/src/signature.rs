//! Content signature for record values.
//!
//! `signature(v) = BLAKE3(v || SIGNATURE_SALT)`. The salt is an opaque fixed
//! constant shared by every writer and reader; it carries no meaning beyond
//! being fixed.

use mnemo_types::{Digest, MemoryRecord, Timestamp};

/// Fixed domain salt appended to every value before hashing.
pub const SIGNATURE_SALT: &[u8] = b"mnemo/record-signature/v1";

/// Deterministic signature of a value. Independent of time, key, or backend.
pub fn signature(value: &[u8]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(value);
    hasher.update(SIGNATURE_SALT);
    Digest::from_hash(*hasher.finalize().as_bytes())
}

/// Build a record for `value`, signed and stamped with the current time.
pub fn signed_record(kind: impl Into<String>, key: impl Into<String>, value: Vec<u8>) -> MemoryRecord {
    let signature = signature(&value);
    MemoryRecord::new(kind, key, value, signature, Timestamp::now())
}

/// Returns `true` if the record's stored signature matches its value.
pub fn verify_signature(record: &MemoryRecord) -> bool {
    signature(&record.value) == record.signature
}
