use mnemo_types::{Digest, Timestamp, GENESIS_SENTINEL};

use crate::hasher::ContentHasher;

/// The hashed fields of a ledger block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockFields {
    pub index: u64,
    pub prev_hash: Digest,
    pub payload_hash: Digest,
    pub timestamp: Timestamp,
    pub succeeded: bool,
    pub ack_count: u32,
}

/// Canonical block hash.
///
/// Layout under the block domain, all integers little-endian:
/// `index(8) || prev_hash(32) || payload_hash(32) || timestamp(12) ||
/// succeeded(1) || ack_count(4)`.
pub fn block_hash(fields: &BlockFields) -> Digest {
    ContentHasher::BLOCK.hash_parts(&[
        &fields.index.to_le_bytes(),
        fields.prev_hash.as_bytes(),
        fields.payload_hash.as_bytes(),
        &fields.timestamp.to_le_bytes(),
        &[u8::from(fields.succeeded)],
        &fields.ack_count.to_le_bytes(),
    ])
}

/// Anything that participates in a hash chain.
pub trait ChainLink {
    /// The fields covered by the hash.
    fn fields(&self) -> BlockFields;
    /// The hash recorded when the link was appended.
    fn stored_hash(&self) -> Digest;
}

/// Hash chain integrity verifier.
///
/// A link at position `i` is sound when:
/// 1. its index field equals `i`
/// 2. its `prev_hash` equals the stored hash of link `i - 1`, or
///    [`GENESIS_SENTINEL`] for `i == 0`
/// 3. its hash recomputed from its fields equals its stored hash
///
/// Links are checked in order, so every link before the reported index is
/// sound.
pub struct HashChainVerifier;

impl HashChainVerifier {
    /// Verify a chain, returning the first failure.
    pub fn verify_chain(links: &[impl ChainLink]) -> Result<(), ChainError> {
        Self::verify_from(links, 0, GENESIS_SENTINEL)
    }

    /// Verify a chain segment whose first link sits at `start_index` and
    /// must follow `prev_hash`.
    pub fn verify_from(
        links: &[impl ChainLink],
        start_index: u64,
        prev_hash: Digest,
    ) -> Result<(), ChainError> {
        let mut expected_prev = prev_hash;

        for (offset, link) in links.iter().enumerate() {
            let position = start_index + offset as u64;
            let fields = link.fields();

            if fields.index != position {
                return Err(ChainError::IndexMismatch {
                    index: position,
                    found: fields.index,
                });
            }
            if fields.prev_hash != expected_prev {
                return Err(ChainError::BrokenLink { index: position });
            }
            if block_hash(&fields) != link.stored_hash() {
                return Err(ChainError::HashMismatch { index: position });
            }

            expected_prev = link.stored_hash();
        }

        Ok(())
    }

    /// Index of the first unsound link, or `None` for a sound chain.
    pub fn first_divergence(links: &[impl ChainLink]) -> Option<u64> {
        Self::verify_chain(links).err().map(|e| e.index())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("link at position {index} carries index {found}")]
    IndexMismatch { index: u64, found: u64 },

    #[error("broken link at index {index}: prev_hash does not match")]
    BrokenLink { index: u64 },

    #[error("hash mismatch at index {index}: computed hash differs from stored")]
    HashMismatch { index: u64 },
}

impl ChainError {
    /// Position of the divergent link.
    pub fn index(&self) -> u64 {
        match self {
            Self::IndexMismatch { index, .. }
            | Self::BrokenLink { index }
            | Self::HashMismatch { index } => *index,
        }
    }
}
