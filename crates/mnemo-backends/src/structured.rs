use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use mnemo_types::{Digest, MemoryRecord, Timestamp};

use crate::error::{BackendError, BackendResult};
use crate::traits::BackendAdapter;

/// Relational medium: one row per record in a SQLite `memories` table.
///
/// Every write inserts a new row; reads return the newest row for the key.
/// A single connection behind a mutex serializes access.
pub struct StructuredAdapter {
    conn: Mutex<Connection>,
}

impl StructuredAdapter {
    pub const NAME: &'static str = "structured";

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> BackendResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> BackendResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> BackendResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_ms INTEGER NOT NULL,
                ts_logical INTEGER NOT NULL,
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                signature TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_key ON memories(key, id DESC);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Total rows, across all keys and versions.
    pub fn row_count(&self) -> BackendResult<u64> {
        let conn = self.conn.lock().map_err(|_| BackendError::LockPoisoned)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Number of records stored per `kind`, sorted by kind.
    pub fn kind_counts(&self) -> BackendResult<Vec<(String, u64)>> {
        let conn = self.conn.lock().map_err(|_| BackendError::LockPoisoned)?;
        let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM memories GROUP BY kind ORDER BY kind")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut counts = Vec::new();
        for row in rows {
            let (kind, n) = row?;
            counts.push((kind, n as u64));
        }
        Ok(counts)
    }
}

impl BackendAdapter for StructuredAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn write(&self, record: &MemoryRecord) -> BackendResult<()> {
        let ts_ms = i64::try_from(record.timestamp.unix_ms)
            .map_err(|_| BackendError::Serialization(format!("timestamp {} out of range", record.timestamp)))?;
        let conn = self.conn.lock().map_err(|_| BackendError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO memories (ts_ms, ts_logical, kind, key, value, signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ts_ms,
                i64::from(record.timestamp.logical),
                record.kind,
                record.key,
                record.value,
                record.signature.to_hex(),
            ],
        )?;
        debug!(key = %record.key, "structured row inserted");
        Ok(())
    }

    fn read(&self, key: &str) -> BackendResult<Option<MemoryRecord>> {
        let conn = self.conn.lock().map_err(|_| BackendError::LockPoisoned)?;
        let row = conn
            .query_row(
                "SELECT ts_ms, ts_logical, kind, value, signature FROM memories
                 WHERE key = ?1 ORDER BY id DESC LIMIT 1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((ts_ms, ts_logical, kind, value, signature)) = row else {
            return Ok(None);
        };
        let signature = Digest::from_hex(&signature)
            .map_err(|e| BackendError::Corrupt(format!("signature column for {key}: {e}")))?;
        let timestamp = match (u64::try_from(ts_ms), u32::try_from(ts_logical)) {
            (Ok(ms), Ok(logical)) => Timestamp::new(ms, logical),
            _ => {
                return Err(BackendError::Corrupt(format!(
                    "timestamp columns for {key} out of range: {ts_ms}.{ts_logical}"
                )))
            }
        };
        Ok(Some(MemoryRecord::new(kind, key, value, signature, timestamp)))
    }

    fn flush(&self) -> BackendResult<()> {
        let conn = self.conn.lock().map_err(|_| BackendError::LockPoisoned)?;
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}
