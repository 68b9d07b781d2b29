//! Length + CRC32 framing shared by the binary media.
//!
//! On-medium format:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload]
//! ```

use std::fs::File;

use tracing::{error, warn};

use crate::error::{BackendError, BackendResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Frame a payload.
pub fn encode(payload: &[u8]) -> BackendResult<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| BackendError::Serialization(format!("payload of {} bytes is too large to frame", payload.len())))?;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode the frame at the start of `buf`. Trailing bytes are ignored.
pub fn decode(buf: &[u8]) -> BackendResult<&[u8]> {
    let (length, expected_crc) = read_header(buf)
        .ok_or_else(|| BackendError::Corrupt(format!("frame header truncated at {} bytes", buf.len())))?;
    let end = HEADER_SIZE + length as usize;
    if buf.len() < end {
        return Err(BackendError::Corrupt(format!(
            "frame declares {length} bytes but only {} follow",
            buf.len() - HEADER_SIZE
        )));
    }
    let payload = &buf[HEADER_SIZE..end];
    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(BackendError::Corrupt(format!(
            "CRC mismatch: expected {expected_crc:08x}, computed {actual_crc:08x}"
        )));
    }
    Ok(payload)
}

fn read_header(buf: &[u8]) -> Option<(u32, u32)> {
    let header = buf.get(..HEADER_SIZE)?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Some((length, crc))
}

/// Cut `file` back to `len` after a failed append.
///
/// Returns `false` when the partial frame could not be removed. A later scan
/// would read it as a torn tail and drop every frame behind it, so the caller
/// must stop appending to `file`.
pub fn roll_back_append(file: &File, len: u64) -> bool {
    match file.set_len(len) {
        Ok(()) => true,
        Err(e) => {
            error!(len, error = %e, "could not roll back partial frame; file sealed for appends");
            false
        }
    }
}

/// A frame found while scanning a segment.
#[derive(Debug, PartialEq, Eq)]
pub struct ScannedFrame<'a> {
    /// Byte offset of the frame header.
    pub offset: u64,
    /// Payload bytes.
    pub payload: &'a [u8],
}

/// Front-to-back scan over a buffer of concatenated frames.
///
/// Frames that fail the CRC check are logged and skipped. Scanning stops at
/// the first header whose length runs past the end of the buffer; that is a
/// torn write, and [`valid_len`](Self::valid_len) reports where it starts.
pub struct FrameScanner<'a> {
    buf: &'a [u8],
    offset: usize,
    skipped: usize,
}

impl<'a> FrameScanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            skipped: 0,
        }
    }

    /// Bytes up to the end of the last complete frame seen so far.
    pub fn valid_len(&self) -> u64 {
        self.offset as u64
    }

    /// Number of complete frames skipped for a CRC mismatch.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<'a> Iterator for FrameScanner<'a> {
    type Item = ScannedFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let buf = self.buf;
        loop {
            let rest = &buf[self.offset..];
            let (length, expected_crc) = read_header(rest)?;
            let end = HEADER_SIZE + length as usize;
            if length == 0 || rest.len() < end {
                if !rest.is_empty() {
                    warn!(
                        offset = self.offset,
                        length,
                        remaining = rest.len(),
                        "torn frame; stopping scan"
                    );
                }
                return None;
            }

            let frame_offset = self.offset;
            self.offset += end;
            let payload = &rest[HEADER_SIZE..end];
            let actual_crc = crc32fast::hash(payload);
            if actual_crc != expected_crc {
                warn!(
                    offset = frame_offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC mismatch; skipping frame"
                );
                self.skipped += 1;
                continue;
            }
            return Some(ScannedFrame {
                offset: frame_offset as u64,
                payload,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(payloads: &[&[u8]]) -> Vec<u8> {
        payloads
            .iter()
            .flat_map(|p| encode(p).unwrap())
            .collect()
    }

    #[test]
    fn decode_ignores_trailing_padding() {
        let mut framed = encode(b"payload").unwrap();
        framed.extend_from_slice(&[0u8; 13]);
        assert_eq!(decode(&framed).unwrap(), b"payload");
    }

    #[test]
    fn decode_rejects_flipped_byte() {
        let mut framed = encode(b"payload").unwrap();
        framed[HEADER_SIZE + 2] ^= 0x01;
        assert!(matches!(decode(&framed), Err(BackendError::Corrupt(_))));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let framed = encode(b"payload").unwrap();
        assert!(decode(&framed[..5]).is_err());
        assert!(decode(&framed[..framed.len() - 1]).is_err());
    }

    #[test]
    fn scan_yields_offsets() {
        let buf = segment(&[b"one", b"three"]);
        let frames: Vec<_> = FrameScanner::new(&buf).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].offset, 0);
        assert_eq!(frames[0].payload, b"one");
        assert_eq!(frames[1].offset, (HEADER_SIZE + 3) as u64);
        assert_eq!(frames[1].payload, b"three");
    }

    #[test]
    fn scan_skips_crc_failure() {
        let mut buf = segment(&[b"first", b"second", b"third"]);
        buf[HEADER_SIZE] ^= 0xff;
        let mut scanner = FrameScanner::new(&buf);
        let payloads: Vec<&[u8]> = scanner.by_ref().map(|f| f.payload).collect();
        assert_eq!(payloads, vec![&b"second"[..], &b"third"[..]]);
        assert_eq!(scanner.skipped(), 1);
        assert_eq!(scanner.valid_len(), buf.len() as u64);
    }

    #[test]
    fn scan_stops_at_torn_tail() {
        let mut buf = segment(&[b"kept"]);
        let kept = buf.len() as u64;
        let torn = encode(b"lost in a crash").unwrap();
        buf.extend_from_slice(&torn[..torn.len() - 4]);

        let mut scanner = FrameScanner::new(&buf);
        assert_eq!(scanner.by_ref().count(), 1);
        assert_eq!(scanner.valid_len(), kept);
    }

    #[test]
    fn roll_back_cuts_partial_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        std::fs::write(&path, segment(&[b"whole", b"partial"])).unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();

        let whole = (HEADER_SIZE + 5) as u64;
        assert!(roll_back_append(&file, whole));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), whole);
    }

    #[test]
    fn failed_roll_back_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let bytes = segment(&[b"whole", b"partial"]);
        std::fs::write(&path, &bytes).unwrap();
        let read_only = File::open(&path).unwrap();

        assert!(!roll_back_append(&read_only, 0));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), bytes.len() as u64);
    }

    #[test]
    fn scan_empty_buffer() {
        let mut scanner = FrameScanner::new(&[]);
        assert!(scanner.next().is_none());
        assert_eq!(scanner.valid_len(), 0);
    }
}
