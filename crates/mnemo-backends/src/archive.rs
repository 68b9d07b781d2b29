use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use mnemo_types::MemoryRecord;

use crate::error::{BackendError, BackendResult};
use crate::frame::{self, FrameScanner, HEADER_SIZE};
use crate::traits::BackendAdapter;

/// zstd level for archived records.
const COMPRESSION_LEVEL: i32 = 3;

struct Segment {
    file: File,
    /// End of the last complete frame.
    len: u64,
    /// Latest frame offset per key.
    index: HashMap<String, u64>,
    /// Cleared when a partial frame could not be rolled back.
    appendable: bool,
}

/// Archive medium: a single append-only segment file.
///
/// Each record is bincode-encoded, zstd-compressed, and framed with a length
/// prefix and CRC32. The key index lives in memory and is rebuilt by scanning
/// the segment on open; frames that fail the CRC are skipped and a torn tail
/// is truncated.
pub struct ArchiveAdapter {
    path: PathBuf,
    segment: Mutex<Segment>,
}

impl ArchiveAdapter {
    pub const NAME: &'static str = "archive";

    /// Open (or create) the segment file at `path` and rebuild the index.
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

        let mut index = HashMap::new();
        let mut scanner = FrameScanner::new(&buf);
        for frame in scanner.by_ref() {
            match decode_record(frame.payload) {
                Ok(record) => {
                    index.insert(record.key, frame.offset);
                }
                Err(e) => warn!(offset = frame.offset, error = %e, "undecodable archive frame; skipping"),
            }
        }
        let len = scanner.valid_len();
        if len < buf.len() as u64 {
            warn!(
                path = %path.display(),
                valid = len,
                actual = buf.len(),
                "truncating torn archive tail"
            );
            file.set_len(len)?;
        }

        info!(path = %path.display(), keys = index.len(), bytes = len, "archive opened");
        Ok(Self {
            path: path.to_path_buf(),
            segment: Mutex::new(Segment {
                file,
                len,
                index,
                appendable: true,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct keys in the index.
    pub fn key_count(&self) -> BackendResult<usize> {
        Ok(self.segment.lock().map_err(|_| BackendError::LockPoisoned)?.index.len())
    }
}

fn encode_record(record: &MemoryRecord) -> BackendResult<Vec<u8>> {
    let raw = bincode::serialize(record)?;
    let compressed = zstd::encode_all(raw.as_slice(), COMPRESSION_LEVEL)?;
    frame::encode(&compressed)
}

fn decode_record(payload: &[u8]) -> BackendResult<MemoryRecord> {
    let raw = zstd::decode_all(payload)
        .map_err(|e| BackendError::Corrupt(format!("decompression failed: {e}")))?;
    bincode::deserialize(&raw).map_err(|e| BackendError::Corrupt(format!("record decode failed: {e}")))
}

impl BackendAdapter for ArchiveAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn write(&self, record: &MemoryRecord) -> BackendResult<()> {
        let framed = encode_record(record)?;

        let mut seg = self.segment.lock().map_err(|_| BackendError::LockPoisoned)?;
        if !seg.appendable {
            return Err(BackendError::Unavailable(format!(
                "{} holds a partial frame; reopen to recover",
                self.path.display()
            )));
        }
        let offset = seg.len;
        if let Err(e) = seg.file.write_all(&framed) {
            seg.appendable = frame::roll_back_append(&seg.file, offset);
            return Err(e.into());
        }
        seg.len += framed.len() as u64;
        seg.index.insert(record.key.clone(), offset);

        debug!(key = %record.key, offset, len = framed.len(), "archive append");
        Ok(())
    }

    fn read(&self, key: &str) -> BackendResult<Option<MemoryRecord>> {
        let mut seg = self.segment.lock().map_err(|_| BackendError::LockPoisoned)?;
        let Some(&offset) = seg.index.get(key) else {
            return Ok(None);
        };

        let mut header = [0u8; HEADER_SIZE];
        seg.file.seek(SeekFrom::Start(offset))?;
        seg.file.read_exact(&mut header)?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let mut framed = vec![0u8; HEADER_SIZE + length];
        framed[..HEADER_SIZE].copy_from_slice(&header);
        seg.file.read_exact(&mut framed[HEADER_SIZE..])?;
        drop(seg);

        let record = decode_record(frame::decode(&framed)?)?;
        if record.key != key {
            return Err(BackendError::Corrupt(format!(
                "index points {key} at a frame for {}",
                record.key
            )));
        }
        Ok(Some(record))
    }

    fn flush(&self) -> BackendResult<()> {
        let seg = self.segment.lock().map_err(|_| BackendError::LockPoisoned)?;
        seg.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_crypto::signed_record;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ArchiveAdapter::open(&dir.path().join("archive.seg")).unwrap();
        let a = signed_record("note", "a", b"alpha".to_vec());
        let b = signed_record("note", "b", vec![7u8; 4096]);
        adapter.write(&a).unwrap();
        adapter.write(&b).unwrap();
        assert_eq!(adapter.read("a").unwrap(), Some(a));
        assert_eq!(adapter.read("b").unwrap(), Some(b));
        assert_eq!(adapter.read("c").unwrap(), None);
    }

    #[test]
    fn compression_shrinks_repetitive_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.seg");
        let adapter = ArchiveAdapter::open(&path).unwrap();
        adapter.write(&signed_record("note", "k", vec![b'x'; 64 * 1024])).unwrap();
        assert!(fs::metadata(&path).unwrap().len() < 4 * 1024);
    }

    #[test]
    fn index_rebuilt_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.seg");
        {
            let adapter = ArchiveAdapter::open(&path).unwrap();
            adapter.write(&signed_record("note", "k", b"v1".to_vec())).unwrap();
            adapter.write(&signed_record("note", "k", b"v2".to_vec())).unwrap();
            adapter.write(&signed_record("note", "j", b"other".to_vec())).unwrap();
            adapter.flush().unwrap();
        }
        let adapter = ArchiveAdapter::open(&path).unwrap();
        assert_eq!(adapter.key_count().unwrap(), 2);
        assert_eq!(adapter.read("k").unwrap().unwrap().value, b"v2");
    }

    #[test]
    fn crc_failure_falls_back_to_earlier_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.seg");
        let first_len;
        {
            let adapter = ArchiveAdapter::open(&path).unwrap();
            adapter.write(&signed_record("note", "k", b"v1".to_vec())).unwrap();
            first_len = fs::metadata(&path).unwrap().len();
            adapter.write(&signed_record("note", "k", b"v2".to_vec())).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes[first_len as usize + HEADER_SIZE + 1] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let adapter = ArchiveAdapter::open(&path).unwrap();
        assert_eq!(adapter.read("k").unwrap().unwrap().value, b"v1");
    }

    #[test]
    fn torn_tail_truncated_and_appends_continue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.seg");
        let good_len;
        {
            let adapter = ArchiveAdapter::open(&path).unwrap();
            adapter.write(&signed_record("note", "k", b"kept".to_vec())).unwrap();
            good_len = fs::metadata(&path).unwrap().len();
        }
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        drop(f);

        let adapter = ArchiveAdapter::open(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        adapter.write(&signed_record("note", "n", b"after".to_vec())).unwrap();
        assert_eq!(adapter.read("k").unwrap().unwrap().value, b"kept");
        assert_eq!(adapter.read("n").unwrap().unwrap().value, b"after");
    }

    #[test]
    fn failed_roll_back_seals_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.seg");
        let kept = signed_record("note", "k", b"kept".to_vec());
        let len;
        let index;
        {
            let adapter = ArchiveAdapter::open(&path).unwrap();
            adapter.write(&kept).unwrap();
            let seg = adapter.segment.lock().unwrap();
            len = seg.len;
            index = seg.index.clone();
        }

        // A read-only handle fails both the append and the truncate.
        let adapter = ArchiveAdapter {
            path: path.clone(),
            segment: Mutex::new(Segment {
                file: File::open(&path).unwrap(),
                len,
                index,
                appendable: true,
            }),
        };
        let next = signed_record("note", "n", b"next".to_vec());
        assert!(matches!(adapter.write(&next), Err(BackendError::Io(_))));
        assert!(matches!(adapter.write(&next), Err(BackendError::Unavailable(_))));
        assert_eq!(adapter.read("k").unwrap(), Some(kept));
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
    }

    #[test]
    fn damage_after_open_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.seg");
        let adapter = ArchiveAdapter::open(&path).unwrap();
        adapter.write(&signed_record("note", "k", b"value".to_vec())).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(adapter.read("k"), Err(BackendError::Corrupt(_))));
    }
}
