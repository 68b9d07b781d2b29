use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mnemo_backends::{
    ArchiveAdapter, BackendAdapter, BackendResult, DocumentAdapter, GlyphAdapter, RecursiveAdapter,
    StructuredAdapter,
};
use mnemo_ledger::SyncMode;

use crate::error::{StoreError, StoreResult};

/// Built-in storage media selectable from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Structured,
    Document,
    Recursive,
    Archive,
    Glyph,
}

impl BackendKind {
    /// Default recall priority.
    pub const DEFAULT_ORDER: [BackendKind; 5] = [
        BackendKind::Structured,
        BackendKind::Document,
        BackendKind::Recursive,
        BackendKind::Archive,
        BackendKind::Glyph,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Structured => StructuredAdapter::NAME,
            Self::Document => DocumentAdapter::NAME,
            Self::Recursive => RecursiveAdapter::NAME,
            Self::Archive => ArchiveAdapter::NAME,
            Self::Glyph => GlyphAdapter::NAME,
        }
    }

    /// Open this medium under `data_dir`.
    pub fn open(&self, data_dir: &Path) -> BackendResult<Arc<dyn BackendAdapter>> {
        let adapter: Arc<dyn BackendAdapter> = match self {
            Self::Structured => Arc::new(StructuredAdapter::open(&data_dir.join("structured").join("memories.sqlite"))?),
            Self::Document => Arc::new(DocumentAdapter::open(&data_dir.join("documents"))?),
            Self::Recursive => Arc::new(RecursiveAdapter::open(&data_dir.join("recursive").join("nodes.journal"))?),
            Self::Archive => Arc::new(ArchiveAdapter::open(&data_dir.join("archive").join("archive.seg"))?),
            Self::Glyph => Arc::new(GlyphAdapter::open(&data_dir.join("glyphs"))?),
        };
        Ok(adapter)
    }
}

/// Ledger file settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// File name under the data directory.
    pub file_name: String,
    pub sync_mode: SyncMode,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            file_name: "ledger.jsonl".into(),
            sync_mode: SyncMode::EveryWrite,
        }
    }
}

/// Memory store configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// data_dir = "/var/lib/mnemo"
/// backend_timeout_ms = 500
/// backends = ["document", "archive"]
///
/// [ledger]
/// sync_mode = "os_default"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for every medium and the ledger.
    pub data_dir: PathBuf,
    /// Per-backend budget for one write or read.
    pub backend_timeout_ms: u64,
    /// Cap on backend calls one persist runs at once, and on calls a single
    /// backend may have in flight.
    pub max_parallel_writes: usize,
    /// Media to open. The order is also the recall priority.
    pub backends: Vec<BackendKind>,
    pub ledger: LedgerConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backend_timeout_ms: 2_000,
            max_parallel_writes: 8,
            backends: BackendKind::DEFAULT_ORDER.to_vec(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger.file_name)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.backends.is_empty() {
            return Err(StoreError::NoBackends);
        }
        for (i, kind) in self.backends.iter().enumerate() {
            if self.backends[..i].contains(kind) {
                return Err(StoreError::DuplicateBackend(kind.name().into()));
            }
        }
        if self.backend_timeout_ms == 0 {
            return Err(StoreError::Config("backend_timeout_ms must be positive".into()));
        }
        if self.max_parallel_writes == 0 {
            return Err(StoreError::Config("max_parallel_writes must be positive".into()));
        }
        if self.ledger.file_name.trim().is_empty() {
            return Err(StoreError::Config("ledger.file_name is empty".into()));
        }
        Ok(())
    }
}
