use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use mnemo_types::MemoryRecord;

use crate::error::{BackendError, BackendResult};
use crate::frame;
use crate::layout;
use crate::traits::BackendAdapter;

const EXTENSION: &str = "pgm";
const MAX_GRAY: u8 = 255;

/// An 8-bit grayscale raster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Glyph {
    pub width: u32,
    pub height: u32,
    /// Row-major, one byte per pixel, `width * height` long.
    pub pixels: Vec<u8>,
}

impl Glyph {
    /// Lay `data` out in the smallest near-square raster that holds it.
    /// Unused trailing pixels are black.
    pub fn from_bytes(data: &[u8]) -> Self {
        let n = data.len().max(1);
        let mut width = (n as f64).sqrt().ceil() as usize;
        while width * width < n {
            width += 1;
        }
        let height = n.div_ceil(width);
        let mut pixels = data.to_vec();
        pixels.resize(width * height, 0);
        Self {
            width: width as u32,
            height: height as u32,
            pixels,
        }
    }

    /// Binary PGM (`P5`) encoding.
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n{}\n", self.width, self.height, MAX_GRAY).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }

    /// Parse a binary PGM with a maxval of 255.
    pub fn from_pgm(bytes: &[u8]) -> BackendResult<Self> {
        let mut pos = 0;
        let mut fields = [0u32; 3];
        let magic = next_token(bytes, &mut pos).ok_or_else(|| corrupt("missing magic"))?;
        if magic != b"P5" {
            return Err(corrupt("not a binary PGM"));
        }
        for field in &mut fields {
            let token = next_token(bytes, &mut pos).ok_or_else(|| corrupt("truncated header"))?;
            *field = std::str::from_utf8(token)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| corrupt("non-numeric header field"))?;
        }
        let [width, height, maxval] = fields;
        if maxval != u32::from(MAX_GRAY) {
            return Err(corrupt("unsupported maxval"));
        }
        // Exactly one whitespace byte separates the header from the raster.
        pos += 1;
        let size = width as usize * height as usize;
        let pixels = bytes
            .get(pos..pos + size)
            .ok_or_else(|| corrupt("raster shorter than header declares"))?
            .to_vec();
        Ok(Self { width, height, pixels })
    }
}

fn corrupt(reason: &str) -> BackendError {
    BackendError::Corrupt(format!("glyph: {reason}"))
}

fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (start < *pos).then(|| &bytes[start..*pos])
}

/// Image medium: each record rendered as a grayscale raster.
///
/// The pixel bytes are a length + CRC32 framed bincode encoding of the
/// record, so a damaged image is reported as corrupt rather than decoded into
/// a different record. Layout is `<root>/<key-digest>/<timestamp>-<seq>.pgm`.
pub struct GlyphAdapter {
    root: PathBuf,
    seq: AtomicU64,
    sync: bool,
}

impl GlyphAdapter {
    pub const NAME: &'static str = "glyph";

    /// Open (or create) an image tree rooted at `root`.
    pub fn open(root: &Path) -> BackendResult<Self> {
        fs::create_dir_all(root)?;
        let seq = layout::max_seq(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            seq: AtomicU64::new(seq),
            sync: true,
        })
    }

    /// Skip `fsync` on each image.
    pub fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    /// Path of the newest image stored for `key`.
    pub fn latest_path(&self, key: &str) -> BackendResult<Option<PathBuf>> {
        Ok(layout::latest_file(&layout::key_dir(&self.root, key), EXTENSION)?)
    }

    pub fn encode(record: &MemoryRecord) -> BackendResult<Glyph> {
        let framed = frame::encode(&bincode::serialize(record)?)?;
        Ok(Glyph::from_bytes(&framed))
    }

    pub fn decode(glyph: &Glyph) -> BackendResult<MemoryRecord> {
        let payload = frame::decode(&glyph.pixels)?;
        bincode::deserialize(payload).map_err(|e| corrupt(&e.to_string()))
    }
}

impl BackendAdapter for GlyphAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn write(&self, record: &MemoryRecord) -> BackendResult<()> {
        let glyph = Self::encode(record)?;
        let dir = layout::key_dir(&self.root, &record.key);
        fs::create_dir_all(&dir)?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let path = dir.join(layout::record_file_name(&record.timestamp, seq, EXTENSION));
        layout::write_atomic(&path, &glyph.to_pgm(), self.sync)?;

        debug!(key = %record.key, width = glyph.width, height = glyph.height, "glyph written");
        Ok(())
    }

    fn read(&self, key: &str) -> BackendResult<Option<MemoryRecord>> {
        let Some(path) = self.latest_path(key)? else {
            return Ok(None);
        };
        let glyph = Glyph::from_pgm(&fs::read(&path)?)?;
        Self::decode(&glyph).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_crypto::signed_record;

    #[test]
    fn raster_is_near_square() {
        let g = Glyph::from_bytes(&[1u8; 10]);
        assert_eq!((g.width, g.height), (4, 3));
        assert_eq!(g.pixels.len(), 12);
        assert_eq!(&g.pixels[10..], &[0, 0]);

        let g = Glyph::from_bytes(&[9u8; 16]);
        assert_eq!((g.width, g.height), (4, 4));
    }

    #[test]
    fn pgm_header_and_raster() {
        let g = Glyph::from_bytes(b"abcd");
        let pgm = g.to_pgm();
        assert!(pgm.starts_with(b"P5\n2 2\n255\n"));
        assert_eq!(Glyph::from_pgm(&pgm).unwrap(), g);
    }

    #[test]
    fn rejects_other_formats() {
        assert!(Glyph::from_pgm(b"P2\n1 1\n255\n0").is_err());
        assert!(Glyph::from_pgm(b"P5\n4 4\n255\nab").is_err());
        assert!(Glyph::from_pgm(b"").is_err());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = GlyphAdapter::open(dir.path()).unwrap().without_sync();
        let rec = signed_record("note", "k", b"rendered as pixels".to_vec());
        adapter.write(&rec).unwrap();
        assert_eq!(adapter.read("k").unwrap(), Some(rec));
        assert_eq!(adapter.read("nope").unwrap(), None);
    }

    #[test]
    fn latest_image_wins() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = GlyphAdapter::open(dir.path()).unwrap().without_sync();
        adapter.write(&signed_record("note", "k", b"one".to_vec())).unwrap();
        adapter.write(&signed_record("note", "k", b"two".to_vec())).unwrap();
        assert_eq!(adapter.read("k").unwrap().unwrap().value, b"two");
    }

    #[test]
    fn damaged_pixel_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = GlyphAdapter::open(dir.path()).unwrap().without_sync();
        adapter.write(&signed_record("note", "k", b"fragile".to_vec())).unwrap();

        let path = adapter.latest_path("k").unwrap().unwrap();
        let mut glyph = Glyph::from_pgm(&fs::read(&path).unwrap()).unwrap();
        glyph.pixels[frame::HEADER_SIZE] ^= 0x55;
        fs::write(&path, glyph.to_pgm()).unwrap();

        assert!(matches!(adapter.read("k"), Err(BackendError::Corrupt(_))));
    }
}
