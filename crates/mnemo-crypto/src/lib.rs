//! Hashing primitives for mnemo.
//!
//! Provides the record signature function, domain-separated BLAKE3 hashing,
//! the canonical block hash, and hash chain verification.
//!
//! All operations wrap BLAKE3; there is no custom cryptography.

pub mod chain;
pub mod hasher;
pub mod signature;

pub use chain::{block_hash, BlockFields, ChainError, ChainLink, HashChainVerifier};
pub use hasher::ContentHasher;
pub use signature::{signature, signed_record, verify_signature, SIGNATURE_SALT};
