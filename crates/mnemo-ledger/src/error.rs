use std::io;

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored block could not be decoded.
    #[error("corrupt block at index {index}: {reason}")]
    CorruptEntry { index: u64, reason: String },

    /// A block was handed to a log out of sequence.
    #[error("append out of order: expected index {expected}, got {found}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("invalid block range: from={from}, to={to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("ledger lock poisoned")]
    LockPoisoned,

    /// The backing storage refused the operation.
    #[error("ledger storage unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
