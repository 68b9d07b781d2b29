use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use mnemo_types::{Digest, MemoryRecord, Timestamp};

/// What one backend did with one write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum WriteOutcome {
    Acked,
    /// The adapter returned an error.
    Failed(String),
    /// The adapter did not answer within the backend timeout. The write may
    /// still complete in the background.
    TimedOut,
    /// The adapter panicked.
    Panicked,
}

impl WriteOutcome {
    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked)
    }
}

/// Result of one `persist` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistResult {
    pub key: String,
    pub signature: Digest,
    pub timestamp: Timestamp,
    /// Names of the backends that acknowledged the write.
    pub acked_backends: BTreeSet<String>,
    /// Outcome per registered backend.
    pub outcomes: BTreeMap<String, WriteOutcome>,
    pub ack_count: u32,
    /// `ack_count >= 1`.
    pub success: bool,
    /// Index of the ledger block recording this attempt.
    pub block_index: u64,
    /// Hash of that block.
    pub chain_hash: Digest,
}

/// A record served by `recall_record`, with the backend that held it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recalled {
    pub record: MemoryRecord,
    pub backend: String,
}

/// Store-wide counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Persist calls acknowledged by at least one backend, over the life of
    /// the ledger.
    pub total_records: u64,
    /// Blocks in the ledger: one per persist attempt.
    pub chain_length: u64,
    /// Persist attempts no backend acknowledged.
    pub failed_attempts: u64,
    /// Acknowledged writes per backend since this store was opened.
    pub per_backend_acks: BTreeMap<String, u64>,
    /// Failed, timed out, or panicked writes per backend since open.
    pub per_backend_failures: BTreeMap<String, u64>,
}
