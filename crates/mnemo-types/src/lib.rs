//! Foundation types for mnemo.
//!
//! Every other mnemo crate depends on `mnemo-types`.
//!
//! # Key Types
//!
//! - [`Digest`]: 32-byte BLAKE3 output used for signatures and block hashes
//! - [`Timestamp`]: wall-clock milliseconds plus a logical tie-breaker
//! - [`MemoryRecord`]: one immutable, key-addressed value as written to backends

pub mod digest;
pub mod error;
pub mod record;
pub mod temporal;

pub use digest::{Digest, GENESIS_SENTINEL};
pub use error::TypeError;
pub use record::{validate_key, validate_kind, MemoryRecord, MAX_KEY_LEN};
pub use temporal::Timestamp;
