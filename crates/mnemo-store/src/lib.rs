//! Multi-backend memory persistence for mnemo.
//!
//! A [`MemoryStore`] fans every write out to a set of independent storage
//! media, answers reads from the first medium (in a fixed recall order) that
//! holds a verifiable copy, and records every write attempt in a hash-chained
//! [`IntegrityLedger`](mnemo_ledger::IntegrityLedger).
//!
//! ```no_run
//! # async fn demo() -> mnemo_store::StoreResult<()> {
//! use mnemo_store::{MemoryStore, StoreConfig};
//!
//! let store = MemoryStore::open(&StoreConfig::with_data_dir("/var/lib/mnemo"))?;
//! let result = store.persist("note", "greeting", b"hello".to_vec()).await?;
//! assert!(result.success);
//! assert_eq!(store.recall("greeting").await.as_deref(), Some(&b"hello"[..]));
//! assert!(store.verify_integrity().await?.ok);
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod outcome;
pub mod store;

pub use config::{BackendKind, LedgerConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use outcome::{PersistResult, Recalled, StoreStats, WriteOutcome};
pub use store::{
    IntegrityReport, MemoryStore, MemoryStoreBuilder, DEFAULT_BACKEND_TIMEOUT,
    DEFAULT_MAX_PARALLEL_WRITES,
};

pub use mnemo_backends::BackendAdapter;
pub use mnemo_types::MemoryRecord;
