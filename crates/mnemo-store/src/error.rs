use mnemo_backends::BackendError;
use mnemo_ledger::LedgerError;
use mnemo_types::TypeError;

use crate::outcome::PersistResult;

/// Errors surfaced by the memory store.
///
/// Individual backend failures during `persist` and `recall` are not errors;
/// they are reported per backend in the result. Only the conditions below
/// reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No backend acknowledged the write. The attempt is still chained; the
    /// boxed result carries its ledger position and per-backend outcomes.
    #[error("no backend acknowledged {} (block {})", .0.key, .0.block_index)]
    NoBackendAvailable(Box<PersistResult>),

    /// The ledger failed verification at this block.
    #[error("chain verification failed at block {index}")]
    ChainVerification { index: u64 },

    /// The ledger could not record or read blocks.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A backend could not be opened or flushed.
    #[error("backend {name}: {source}")]
    Backend {
        name: String,
        #[source]
        source: BackendError,
    },

    /// Key or record type rejected before dispatch.
    #[error("invalid record: {0}")]
    Type(#[from] TypeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend registered twice: {0}")]
    DuplicateBackend(String),

    #[error("recall order names unknown backend: {0}")]
    UnknownBackend(String),

    #[error("store needs at least one backend")]
    NoBackends,

    /// A blocking task could not be joined.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
