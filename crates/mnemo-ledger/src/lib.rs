//! Append-only integrity ledger for mnemo.
//!
//! Every write attempt made by the memory store, acknowledged or not, becomes
//! exactly one [`Block`]. Blocks are hash-linked: `block[i].prev_hash` is the
//! hash of `block[i - 1]`, and `block[0].prev_hash` is the genesis sentinel.
//! Rewriting any stored field after the fact is detected by
//! [`IntegrityLedger::verify_chain`].
//!
//! This crate provides:
//! - [`Block`]: the fixed logical block layout
//! - [`BlockLog`]: storage boundary for blocks
//! - [`InMemoryBlockLog`] and [`FileBlockLog`] implementations
//! - [`IntegrityLedger`]: the single serialized append point plus verification

pub mod block;
pub mod error;
pub mod file;
pub mod ledger;
pub mod memory;
pub mod traits;

pub use block::Block;
pub use error::{LedgerError, LedgerResult};
pub use file::{FileBlockLog, SyncMode};
pub use ledger::{IntegrityLedger, VerifyReport};
pub use memory::InMemoryBlockLog;
pub use traits::BlockLog;
