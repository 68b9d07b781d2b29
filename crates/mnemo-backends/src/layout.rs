//! Directory layout shared by the per-record file media.
//!
//! Records for a key live under `<root>/<key-digest>/`, one file per record,
//! named so that lexical order is write order:
//! `<unix_ms>-<logical>-<seq>.<ext>`, zero-padded.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use mnemo_crypto::ContentHasher;
use mnemo_types::Timestamp;

/// Directory holding every record for `key`.
pub(crate) fn key_dir(root: &Path, key: &str) -> PathBuf {
    root.join(ContentHasher::KEY.hash(key.as_bytes()).to_hex())
}

pub(crate) fn record_file_name(timestamp: &Timestamp, seq: u64, ext: &str) -> String {
    format!("{:020}-{:010}-{:020}.{ext}", timestamp.unix_ms, timestamp.logical, seq)
}

/// Newest record file in `dir` with extension `ext`, if any.
pub(crate) fn latest_file(dir: &Path, ext: &str) -> io::Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut latest: Option<PathBuf> = None;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        if latest.as_ref().map_or(true, |l| path.file_name() > l.file_name()) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

/// Highest sequence number used by any record file under `root`.
///
/// Scanned on open so that sequence numbers keep increasing across restarts.
pub(crate) fn max_seq(root: &Path) -> io::Result<u64> {
    let mut max = 0;
    let dirs = match fs::read_dir(root) {
        Ok(dirs) => dirs,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    for dir in dirs {
        let dir = dir?;
        if !dir.file_type()?.is_dir() {
            continue;
        }
        for file in fs::read_dir(dir.path())? {
            let name = file?.file_name();
            let seq = name
                .to_str()
                .and_then(|n| n.split('.').next())
                .and_then(|stem| stem.rsplit('-').next())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(seq) = seq {
                max = max.max(seq);
            }
        }
    }
    Ok(max)
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so a
/// reader never sees a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], sync: bool) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        if sync {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp, path)
}
