use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mnemo_crypto::ContentHasher;
use mnemo_types::{Digest, MemoryRecord, GENESIS_SENTINEL};

use crate::error::{BackendError, BackendResult};
use crate::frame::{self, FrameScanner};
use crate::traits::BackendAdapter;

/// A self-describing node: the record, a link to the previous node for the
/// same key, and a hash over both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub record: MemoryRecord,
    /// Previous node for this key, or the genesis sentinel.
    pub prev: Digest,
    /// Hash over `prev` and the encoded record.
    pub hash: Digest,
}

impl Node {
    fn new(record: MemoryRecord, prev: Digest) -> BackendResult<Self> {
        let hash = Self::compute_hash(&record, &prev)?;
        Ok(Self { record, prev, hash })
    }

    fn compute_hash(record: &MemoryRecord, prev: &Digest) -> BackendResult<Digest> {
        let encoded = bincode::serialize(record)?;
        Ok(ContentHasher::NODE.hash_parts(&[prev.as_bytes(), &encoded]))
    }

    /// Returns `true` if the stored hash matches the node's contents.
    pub fn verify(&self) -> bool {
        Self::compute_hash(&self.record, &self.prev).is_ok_and(|h| h == self.hash)
    }
}

#[derive(Default)]
struct Graph {
    nodes: HashMap<Digest, Node>,
    heads: HashMap<String, Digest>,
}

impl Graph {
    fn link(&mut self, node: Node) {
        self.heads.insert(node.record.key.clone(), node.hash);
        self.nodes.insert(node.hash, node);
    }
}

struct Journal {
    file: File,
    /// Cleared when a partial node could not be rolled back.
    appendable: bool,
}

/// Recursive medium: a per-key chain of self-hashing nodes.
///
/// Each write creates a node whose hash covers its record and its
/// predecessor's hash, and moves the key's head to it. Nodes are held in
/// memory; with a journal they are also appended as framed bincode and
/// replayed on open. A node whose self-hash fails is reported as corrupt.
pub struct RecursiveAdapter {
    graph: RwLock<Graph>,
    journal: Option<Mutex<Journal>>,
    journal_path: Option<PathBuf>,
}

impl RecursiveAdapter {
    pub const NAME: &'static str = "recursive";

    /// A node store with no journal. Contents last as long as the adapter.
    pub fn in_memory() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            journal: None,
            journal_path: None,
        }
    }

    /// Open (or create) a journal at `path` and replay it.
    pub fn open(path: &Path) -> BackendResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut graph = Graph::default();
        let mut scanner = FrameScanner::new(&buf);
        for frame in scanner.by_ref() {
            match bincode::deserialize::<Node>(frame.payload) {
                Ok(node) if node.verify() => graph.link(node),
                Ok(node) => warn!(key = %node.record.key, offset = frame.offset, "node hash mismatch; skipping"),
                Err(e) => warn!(offset = frame.offset, error = %e, "undecodable journal node; skipping"),
            }
        }
        let valid = scanner.valid_len();
        if valid < buf.len() as u64 {
            warn!(path = %path.display(), valid, actual = buf.len(), "truncating torn journal tail");
            file.set_len(valid)?;
        }

        info!(path = %path.display(), nodes = graph.nodes.len(), keys = graph.heads.len(), "recursive journal replayed");
        Ok(Self {
            graph: RwLock::new(graph),
            journal: Some(Mutex::new(Journal {
                file,
                appendable: true,
            })),
            journal_path: Some(path.to_path_buf()),
        })
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    /// Every stored record for `key`, newest first, following `prev` links.
    ///
    /// Stops with an error at the first node that fails verification.
    pub fn history(&self, key: &str) -> BackendResult<Vec<MemoryRecord>> {
        let graph = self.graph.read().map_err(|_| BackendError::LockPoisoned)?;
        let mut out = Vec::new();
        let mut cursor = graph.heads.get(key).copied();
        while let Some(hash) = cursor {
            let node = checked_node(&graph, key, &hash)?;
            out.push(node.record.clone());
            cursor = (!node.prev.is_zero()).then_some(node.prev);
        }
        Ok(out)
    }

    /// Head node for `key`, as stored.
    pub fn head(&self, key: &str) -> BackendResult<Option<Node>> {
        let graph = self.graph.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(graph
            .heads
            .get(key)
            .and_then(|h| graph.nodes.get(h))
            .cloned())
    }

    /// Replace a stored node without re-hashing it. Lets tests damage the graph.
    #[cfg(test)]
    fn overwrite_node(&self, node: Node, at: Digest) {
        self.graph.write().unwrap().nodes.insert(at, node);
    }
}

fn checked_node<'g>(graph: &'g Graph, key: &str, hash: &Digest) -> BackendResult<&'g Node> {
    let node = graph
        .nodes
        .get(hash)
        .ok_or_else(|| BackendError::Corrupt(format!("{key}: dangling link to node {}", hash.short())))?;
    if node.hash != *hash || !node.verify() {
        return Err(BackendError::Corrupt(format!("{key}: node {} fails its self-hash", hash.short())));
    }
    Ok(node)
}

impl BackendAdapter for RecursiveAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn write(&self, record: &MemoryRecord) -> BackendResult<()> {
        let mut graph = self.graph.write().map_err(|_| BackendError::LockPoisoned)?;
        let prev = graph.heads.get(&record.key).copied().unwrap_or(GENESIS_SENTINEL);
        let node = Node::new(record.clone(), prev)?;

        if let Some(journal) = &self.journal {
            let framed = frame::encode(&bincode::serialize(&node)?)?;
            let mut journal = journal.lock().map_err(|_| BackendError::LockPoisoned)?;
            if !journal.appendable {
                return Err(BackendError::Unavailable(
                    "journal holds a partial node; reopen to recover".into(),
                ));
            }
            let before = journal.file.metadata()?.len();
            if let Err(e) = journal.file.write_all(&framed) {
                journal.appendable = frame::roll_back_append(&journal.file, before);
                return Err(e.into());
            }
        }

        debug!(key = %record.key, node = %node.hash.short(), prev = %prev.short(), "node linked");
        graph.link(node);
        Ok(())
    }

    fn read(&self, key: &str) -> BackendResult<Option<MemoryRecord>> {
        let graph = self.graph.read().map_err(|_| BackendError::LockPoisoned)?;
        let Some(hash) = graph.heads.get(key) else {
            return Ok(None);
        };
        checked_node(&graph, key, hash).map(|n| Some(n.record.clone()))
    }

    fn flush(&self) -> BackendResult<()> {
        if let Some(journal) = &self.journal {
            journal.lock().map_err(|_| BackendError::LockPoisoned)?.file.sync_data()?;
        }
        Ok(())
    }
}
