use serde::{Deserialize, Serialize};

use mnemo_crypto::{block_hash, BlockFields, ChainLink};
use mnemo_types::{Digest, Timestamp};

/// One ledger entry: the record of a single write attempt.
///
/// `payload_hash` is the signature of the value that was persisted,
/// `ack_count` is how many backends acknowledged it, and `succeeded` is
/// `ack_count >= 1`. `hash` covers every other field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub prev_hash: Digest,
    pub payload_hash: Digest,
    pub timestamp: Timestamp,
    pub succeeded: bool,
    pub ack_count: u32,
    pub hash: Digest,
}

impl Block {
    /// Build a block and compute its hash.
    pub fn seal(
        index: u64,
        prev_hash: Digest,
        payload_hash: Digest,
        timestamp: Timestamp,
        ack_count: u32,
    ) -> Self {
        let fields = BlockFields {
            index,
            prev_hash,
            payload_hash,
            timestamp,
            succeeded: ack_count >= 1,
            ack_count,
        };
        Self {
            index,
            prev_hash,
            payload_hash,
            timestamp,
            succeeded: fields.succeeded,
            ack_count,
            hash: block_hash(&fields),
        }
    }

    /// Recompute the hash from the current field values.
    pub fn compute_hash(&self) -> Digest {
        block_hash(&self.fields())
    }
}

impl ChainLink for Block {
    fn fields(&self) -> BlockFields {
        BlockFields {
            index: self.index,
            prev_hash: self.prev_hash,
            payload_hash: self.payload_hash,
            timestamp: self.timestamp,
            succeeded: self.succeeded,
            ack_count: self.ack_count,
        }
    }

    fn stored_hash(&self) -> Digest {
        self.hash
    }
}
