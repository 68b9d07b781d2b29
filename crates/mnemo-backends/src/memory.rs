use std::collections::HashMap;
use std::sync::RwLock;

use mnemo_types::MemoryRecord;

use crate::error::{BackendError, BackendResult};
use crate::traits::BackendAdapter;

/// In-memory, HashMap-based medium.
///
/// Intended for tests and embedding. Holds only the latest record per key.
pub struct InMemoryAdapter {
    name: String,
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl InMemoryAdapter {
    /// Create an empty adapter named `"memory"`.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create an empty adapter with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.records.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the stored record for its key without any checks.
    ///
    /// Lets tests plant tampered or foreign records.
    pub fn insert_raw(&self, record: MemoryRecord) -> BackendResult<()> {
        let mut map = self.records.write().map_err(|_| BackendError::LockPoisoned)?;
        map.insert(record.key.clone(), record);
        Ok(())
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendAdapter for InMemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, record: &MemoryRecord) -> BackendResult<()> {
        self.insert_raw(record.clone())
    }

    fn read(&self, key: &str) -> BackendResult<Option<MemoryRecord>> {
        let map = self.records.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }
}
