use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use mnemo_types::{Digest, MemoryRecord, Timestamp};

use crate::error::{BackendError, BackendResult};
use crate::layout;
use crate::traits::BackendAdapter;

const EXTENSION: &str = "json";

/// On-disk JSON shape. The value is hex so documents stay plain text.
#[derive(Serialize, Deserialize)]
struct Document {
    #[serde(rename = "type")]
    kind: String,
    key: String,
    value: String,
    signature: Digest,
    timestamp: Timestamp,
}

impl From<&MemoryRecord> for Document {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            kind: record.kind.clone(),
            key: record.key.clone(),
            value: hex::encode(&record.value),
            signature: record.signature,
            timestamp: record.timestamp,
        }
    }
}

impl TryFrom<Document> for MemoryRecord {
    type Error = BackendError;

    fn try_from(doc: Document) -> BackendResult<Self> {
        let value = hex::decode(&doc.value)
            .map_err(|e| BackendError::Corrupt(format!("document value for {}: {e}", doc.key)))?;
        Ok(MemoryRecord::new(doc.kind, doc.key, value, doc.signature, doc.timestamp))
    }
}

/// Document medium: one pretty-printed JSON file per record.
///
/// Layout is `<root>/<key-digest>/<timestamp>-<seq>.json`. Files are written
/// to a temp name and renamed into place.
pub struct DocumentAdapter {
    root: PathBuf,
    seq: AtomicU64,
    sync: bool,
}

impl DocumentAdapter {
    pub const NAME: &'static str = "document";

    /// Open (or create) a document tree rooted at `root`.
    pub fn open(root: &Path) -> BackendResult<Self> {
        fs::create_dir_all(root)?;
        let seq = layout::max_seq(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            seq: AtomicU64::new(seq),
            sync: true,
        })
    }

    /// Skip `fsync` on each document. For tests and scratch stores.
    pub fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the newest document stored for `key`.
    pub fn latest_path(&self, key: &str) -> BackendResult<Option<PathBuf>> {
        Ok(layout::latest_file(&layout::key_dir(&self.root, key), EXTENSION)?)
    }
}

impl BackendAdapter for DocumentAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn write(&self, record: &MemoryRecord) -> BackendResult<()> {
        let dir = layout::key_dir(&self.root, &record.key);
        fs::create_dir_all(&dir)?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let path = dir.join(layout::record_file_name(&record.timestamp, seq, EXTENSION));
        let json = serde_json::to_vec_pretty(&Document::from(record))?;
        layout::write_atomic(&path, &json, self.sync)?;

        debug!(key = %record.key, path = %path.display(), "document written");
        Ok(())
    }

    fn read(&self, key: &str) -> BackendResult<Option<MemoryRecord>> {
        let Some(path) = self.latest_path(key)? else {
            return Ok(None);
        };
        let bytes = fs::read(&path)?;
        let doc: Document = serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::Corrupt(format!("{}: {e}", path.display())))?;
        MemoryRecord::try_from(doc).map(Some)
    }
}
