/// Errors from a single storage medium.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding a record failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored bytes do not decode to a valid record.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// The medium cannot serve requests.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// An internal lock was poisoned by a panicking thread.
    #[error("backend lock poisoned")]
    LockPoisoned,
}

impl From<bincode::Error> for BackendError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
