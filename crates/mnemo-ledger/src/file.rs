use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::block::Block;
use crate::error::{LedgerError, LedgerResult};
use crate::traits::BlockLog;

/// Flush/sync strategy for the ledger file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every block (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering.
    OsDefault,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::EveryWrite
    }
}

struct LogWriter {
    file: File,
    /// Number of complete blocks in the file.
    count: u64,
    /// Byte length of the file; a failed append truncates back to this.
    bytes: u64,
}

/// Block log stored as JSON lines, one block per line.
///
/// A block is acknowledged only after its full line, newline included, has
/// been written. On open, any bytes after the last newline are a torn write
/// from a crash and are truncated away.
pub struct FileBlockLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_mode: SyncMode,
}

impl FileBlockLog {
    /// Open (or create) a ledger file at the given path.
    pub fn open(path: &Path, sync_mode: SyncMode) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (count, bytes) = discard_torn_tail(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        debug!(path = %path.display(), blocks = count, "ledger file opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter { file, count, bytes }),
            sync_mode,
        })
    }

    /// Path to the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Truncate anything after the last newline. Returns (complete lines, bytes kept).
fn discard_torn_tail(path: &Path) -> LedgerResult<(u64, u64)> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e.into()),
    };

    let complete = data
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);

    if complete < data.len() {
        warn!(
            path = %path.display(),
            torn_bytes = data.len() - complete,
            "discarding torn ledger tail"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(complete as u64)?;
        file.sync_all()?;
    }

    let lines = data[..complete].iter().filter(|&&b| b == b'\n').count() as u64;
    Ok((lines, complete as u64))
}

impl BlockLog for FileBlockLog {
    fn append(&self, block: &Block) -> LedgerResult<()> {
        let mut line =
            serde_json::to_vec(block).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let mut w = self.writer.lock().map_err(|_| LedgerError::LockPoisoned)?;
        if block.index != w.count {
            return Err(LedgerError::OutOfOrder {
                expected: w.count,
                found: block.index,
            });
        }

        let mut written = w.file.write_all(&line);
        if written.is_ok() && matches!(self.sync_mode, SyncMode::EveryWrite) {
            written = w.file.sync_data();
        }
        if let Err(e) = written {
            // Leave no partial line behind for the next append to follow.
            if let Err(trunc) = w.file.set_len(w.bytes) {
                warn!(error = %trunc, "could not roll back partial ledger write");
            }
            return Err(e.into());
        }

        w.count += 1;
        w.bytes += line.len() as u64;
        debug!(index = block.index, len = line.len(), "ledger block appended");
        Ok(())
    }

    fn read_range(&self, from: u64, to: u64) -> LedgerResult<Vec<Block>> {
        if from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let to = to.min(self.len()?);
        if from >= to {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut blocks = Vec::with_capacity((to - from) as usize);
        let lines = reader
            .lines()
            .enumerate()
            .skip(from as usize)
            .take((to - from) as usize);

        for (i, line) in lines {
            let index = i as u64;
            let line = line.map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData => LedgerError::CorruptEntry {
                    index,
                    reason: e.to_string(),
                },
                _ => LedgerError::Io(e),
            })?;
            let block: Block =
                serde_json::from_str(&line).map_err(|e| LedgerError::CorruptEntry {
                    index,
                    reason: e.to_string(),
                })?;
            blocks.push(block);
        }

        Ok(blocks)
    }

    fn len(&self) -> LedgerResult<u64> {
        Ok(self.writer.lock().map_err(|_| LedgerError::LockPoisoned)?.count)
    }

    fn flush(&self) -> LedgerResult<()> {
        let w = self.writer.lock().map_err(|_| LedgerError::LockPoisoned)?;
        w.file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileBlockLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlockLog")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_types::{Digest, Timestamp, GENESIS_SENTINEL};

    fn chain(count: u64) -> Vec<Block> {
        let mut out: Vec<Block> = Vec::new();
        for i in 0..count {
            let prev = out.last().map(|b| b.hash).unwrap_or(GENESIS_SENTINEL);
            out.push(Block::seal(i, prev, Digest::from_hash([i as u8; 32]), Timestamp::new(100 + i, 0), 1));
        }
        out
    }

    #[test]
    fn append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let blocks = chain(3);
        {
            let log = FileBlockLog::open(&path, SyncMode::EveryWrite).unwrap();
            for b in &blocks {
                log.append(b).unwrap();
            }
        }

        let log = FileBlockLog::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(log.read_range(0, 3).unwrap(), blocks);
        assert_eq!(log.last().unwrap(), Some(blocks[2].clone()));
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/ledger.jsonl");
        let log = FileBlockLog::open(&path, SyncMode::OsDefault).unwrap();
        assert!(log.is_empty().unwrap());
        assert!(path.exists());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.jsonl");
        let blocks = chain(2);
        {
            let log = FileBlockLog::open(&path, SyncMode::EveryWrite).unwrap();
            log.append(&blocks[0]).unwrap();
            log.append(&blocks[1]).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"index\":2,\"prev_ha").unwrap();
        }

        let log = FileBlockLog::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(log.len().unwrap(), 2);
        assert!(fs::read(&path).unwrap().ends_with(b"\n"));

        // Appending continues cleanly after the discarded bytes.
        let next = Block::seal(2, blocks[1].hash, Digest::from_hash([2; 32]), Timestamp::new(200, 0), 0);
        log.append(&next).unwrap();
        assert_eq!(log.read_range(0, 3).unwrap().len(), 3);
    }

    #[test]
    fn corrupt_line_reported_with_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.jsonl");
        let blocks = chain(3);
        let log = FileBlockLog::open(&path, SyncMode::OsDefault).unwrap();
        for b in &blocks {
            log.append(b).unwrap();
        }

        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines[1] = "not json at all";
        fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();

        let err = log.read_range(0, 3).unwrap_err();
        assert!(matches!(err, LedgerError::CorruptEntry { index: 1, .. }));
        assert_eq!(log.read_range(0, 1).unwrap().len(), 1);
    }

    #[test]
    fn out_of_order_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileBlockLog::open(&dir.path().join("l.jsonl"), SyncMode::OsDefault).unwrap();
        let blocks = chain(2);
        let err = log.append(&blocks[1]).unwrap_err();
        assert!(matches!(err, LedgerError::OutOfOrder { expected: 0, found: 1 }));
    }

    #[test]
    fn sync_mode_serde_names() {
        assert_eq!(serde_json::to_string(&SyncMode::EveryWrite).unwrap(), "\"every_write\"");
        assert_eq!(SyncMode::default(), SyncMode::EveryWrite);
    }
}
