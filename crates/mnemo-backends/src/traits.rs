use mnemo_types::MemoryRecord;

use crate::error::BackendResult;

/// One storage medium.
///
/// All implementations must satisfy these invariants:
/// - `write` returns `Ok` only once the record is readable through `read`.
/// - Latest write wins: `read` returns the most recently written record
///   for the key.
/// - The whole record, signature included, is stored and returned verbatim.
///   The adapter never re-signs or checks the signature; the caller does.
/// - Failures are returned as errors, never as panics.
/// - Calls may arrive concurrently from several threads.
pub trait BackendAdapter: Send + Sync {
    /// Stable name used for recall ordering, stats and logs.
    fn name(&self) -> &str;

    /// Store a record.
    fn write(&self, record: &MemoryRecord) -> BackendResult<()>;

    /// Read the latest record stored under `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored for the key.
    fn read(&self, key: &str) -> BackendResult<Option<MemoryRecord>>;

    /// Flush buffered state to the medium.
    fn flush(&self) -> BackendResult<()> {
        Ok(())
    }
}
