use std::sync::Mutex;

use tracing::{debug, info, warn};

use mnemo_crypto::HashChainVerifier;
use mnemo_types::{Digest, Timestamp, GENESIS_SENTINEL};

use crate::block::Block;
use crate::error::{LedgerError, LedgerResult};
use crate::memory::InMemoryBlockLog;
use crate::traits::BlockLog;

/// Mutable tail of the chain. Guarded by the ledger's single append lock.
struct Tail {
    next_index: u64,
    head_hash: Digest,
    last_timestamp: Timestamp,
    succeeded: u64,
}

/// Outcome of [`IntegrityLedger::verify_chain`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyReport {
    /// `true` when every checked block is sound.
    pub ok: bool,
    /// First block whose fields, link, or index disagree.
    pub first_divergent_index: Option<u64>,
    /// Length of the snapshot that was checked.
    pub blocks_checked: u64,
}

/// Append-only, hash-chained record of every write attempt.
///
/// [`append_block`](Self::append_block) is the one serialized section:
/// it assigns the index, links to the current head, writes the block to the
/// [`BlockLog`], and only then advances the tail. A failed log write leaves
/// the ledger exactly as it was.
pub struct IntegrityLedger {
    log: Box<dyn BlockLog>,
    tail: Mutex<Tail>,
}

impl IntegrityLedger {
    /// Open a ledger over an existing (possibly empty) block log.
    ///
    /// The tail is recovered from the stored blocks. Recovery does not verify
    /// the chain; call [`verify_chain`](Self::verify_chain) for that.
    pub fn open(log: Box<dyn BlockLog>) -> LedgerResult<Self> {
        let len = log.len()?;
        let blocks = log.read_range(0, len)?;
        if (blocks.len() as u64) != len {
            return Err(LedgerError::CorruptEntry {
                index: blocks.len() as u64,
                reason: format!("log reports {len} blocks but {} are readable", blocks.len()),
            });
        }

        let tail = match blocks.last() {
            Some(last) => Tail {
                next_index: len,
                head_hash: last.hash,
                last_timestamp: last.timestamp,
                succeeded: blocks.iter().filter(|b| b.succeeded).count() as u64,
            },
            None => Tail {
                next_index: 0,
                head_hash: GENESIS_SENTINEL,
                last_timestamp: Timestamp::zero(),
                succeeded: 0,
            },
        };

        info!(blocks = len, head = %tail.head_hash.short(), "integrity ledger opened");
        Ok(Self {
            log,
            tail: Mutex::new(tail),
        })
    }

    /// A fresh ledger backed by an [`InMemoryBlockLog`].
    pub fn in_memory() -> Self {
        Self {
            log: Box::new(InMemoryBlockLog::new()),
            tail: Mutex::new(Tail {
                next_index: 0,
                head_hash: GENESIS_SENTINEL,
                last_timestamp: Timestamp::zero(),
                succeeded: 0,
            }),
        }
    }

    /// Append one block recording a write attempt.
    pub fn append_block(
        &self,
        payload_hash: Digest,
        succeeded: bool,
        ack_count: u32,
    ) -> LedgerResult<Block> {
        debug_assert_eq!(succeeded, ack_count >= 1);

        let mut tail = self.tail.lock().map_err(|_| LedgerError::LockPoisoned)?;

        let timestamp = Timestamp::next_after(&tail.last_timestamp);
        let block = Block::seal(tail.next_index, tail.head_hash, payload_hash, timestamp, ack_count);

        self.log.append(&block)?;

        tail.next_index += 1;
        tail.head_hash = block.hash;
        tail.last_timestamp = timestamp;
        if block.succeeded {
            tail.succeeded += 1;
        }

        debug!(
            index = block.index,
            hash = %block.hash.short(),
            ack_count,
            "block appended"
        );
        Ok(block)
    }

    /// Recompute and check every block up to the length observed at call time.
    ///
    /// Appends that land while verification runs are not included. A block
    /// that cannot be decoded is reported as divergent at its index.
    pub fn verify_chain(&self) -> LedgerResult<VerifyReport> {
        let len = self.len()?;

        let blocks = match self.log.read_range(0, len) {
            Ok(blocks) => blocks,
            Err(LedgerError::CorruptEntry { index, reason }) => {
                warn!(index, %reason, "undecodable ledger block");
                return Ok(VerifyReport {
                    ok: false,
                    first_divergent_index: Some(index),
                    blocks_checked: len,
                });
            }
            Err(e) => return Err(e),
        };

        let mut divergent = HashChainVerifier::verify_chain(&blocks)
            .err()
            .map(|e| {
                warn!(error = %e, "ledger chain divergence");
                e.index()
            });
        if divergent.is_none() && (blocks.len() as u64) < len {
            warn!(expected = len, found = blocks.len(), "ledger blocks missing");
            divergent = Some(blocks.len() as u64);
        }

        Ok(VerifyReport {
            ok: divergent.is_none(),
            first_divergent_index: divergent,
            blocks_checked: len,
        })
    }

    /// Number of blocks in the chain.
    pub fn len(&self) -> LedgerResult<u64> {
        Ok(self.tail.lock().map_err(|_| LedgerError::LockPoisoned)?.next_index)
    }

    /// Returns `true` if no block has been appended.
    pub fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Hash of the newest block, or the genesis sentinel for an empty chain.
    pub fn head_hash(&self) -> LedgerResult<Digest> {
        Ok(self.tail.lock().map_err(|_| LedgerError::LockPoisoned)?.head_hash)
    }

    /// Number of blocks recording an acknowledged write.
    pub fn succeeded_count(&self) -> LedgerResult<u64> {
        Ok(self.tail.lock().map_err(|_| LedgerError::LockPoisoned)?.succeeded)
    }

    /// Chain length and succeeded count, read together.
    pub fn counts(&self) -> LedgerResult<(u64, u64)> {
        let tail = self.tail.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok((tail.next_index, tail.succeeded))
    }

    /// Read a single block.
    pub fn block(&self, index: u64) -> LedgerResult<Option<Block>> {
        if index >= self.len()? {
            return Ok(None);
        }
        Ok(self.log.read_range(index, index + 1)?.pop())
    }

    /// Read blocks in `[from, to)`, clamped to the current length.
    pub fn blocks(&self, from: u64, to: u64) -> LedgerResult<Vec<Block>> {
        let to = to.min(self.len()?);
        self.log.read_range(from.min(to), to)
    }

    /// Flush the underlying log.
    pub fn flush(&self) -> LedgerResult<()> {
        self.log.flush()
    }
}

impl std::fmt::Debug for IntegrityLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityLedger")
            .field("len", &self.len().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::file::{FileBlockLog, SyncMode};

    fn payload(n: u8) -> Digest {
        Digest::from_hash([n; 32])
    }

    /// Log that fails every append, for the "ledger storage unavailable" path.
    struct RefusingLog;

    impl BlockLog for RefusingLog {
        fn append(&self, _block: &Block) -> LedgerResult<()> {
            Err(LedgerError::Unavailable("disk detached".into()))
        }
        fn read_range(&self, _from: u64, _to: u64) -> LedgerResult<Vec<Block>> {
            Ok(Vec::new())
        }
        fn len(&self) -> LedgerResult<u64> {
            Ok(0)
        }
    }

    #[test]
    fn genesis_block_links_to_sentinel() {
        let ledger = IntegrityLedger::in_memory();
        let b0 = ledger.append_block(payload(1), true, 3).unwrap();
        assert_eq!(b0.index, 0);
        assert_eq!(b0.prev_hash, GENESIS_SENTINEL);
        assert_eq!(b0.ack_count, 3);
        assert_eq!(ledger.head_hash().unwrap(), b0.hash);
    }

    #[test]
    fn blocks_link_to_predecessor() {
        let ledger = IntegrityLedger::in_memory();
        let b0 = ledger.append_block(payload(1), true, 1).unwrap();
        let b1 = ledger.append_block(payload(2), false, 0).unwrap();
        let b2 = ledger.append_block(payload(3), true, 5).unwrap();
        assert_eq!(b1.prev_hash, b0.hash);
        assert_eq!(b2.prev_hash, b1.hash);
        assert!(b1.timestamp > b0.timestamp);
        assert!(b2.timestamp > b1.timestamp);
        assert_eq!(ledger.len().unwrap(), 3);
        assert_eq!(ledger.succeeded_count().unwrap(), 2);
        assert_eq!(ledger.counts().unwrap(), (3, 2));
    }

    #[test]
    fn failed_attempts_are_recorded() {
        let ledger = IntegrityLedger::in_memory();
        let b = ledger.append_block(payload(9), false, 0).unwrap();
        assert!(!b.succeeded);
        assert_eq!(b.ack_count, 0);
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn untouched_chain_verifies() {
        let ledger = IntegrityLedger::in_memory();
        for i in 0..20 {
            ledger.append_block(payload(i), i % 2 == 0, u32::from(i % 2 == 0)).unwrap();
        }
        let report = ledger.verify_chain().unwrap();
        assert!(report.ok);
        assert_eq!(report.first_divergent_index, None);
        assert_eq!(report.blocks_checked, 20);
    }

    #[test]
    fn empty_chain_verifies() {
        let report = IntegrityLedger::in_memory().verify_chain().unwrap();
        assert!(report.ok);
        assert_eq!(report.blocks_checked, 0);
    }

    #[test]
    fn tampered_payload_reports_its_index() {
        let ledger = IntegrityLedger::in_memory();
        for i in 0..5 {
            ledger.append_block(payload(i), true, 1).unwrap();
        }
        let mut blocks = ledger.blocks(0, 5).unwrap();
        blocks[3].payload_hash = payload(0xee);

        let restored = IntegrityLedger::open(Box::new(InMemoryBlockLog::from_blocks(blocks))).unwrap();
        let report = restored.verify_chain().unwrap();
        assert!(!report.ok);
        assert_eq!(report.first_divergent_index, Some(3));
    }

    #[test]
    fn reopen_recovers_tail() {
        let ledger = IntegrityLedger::in_memory();
        ledger.append_block(payload(1), true, 1).unwrap();
        ledger.append_block(payload(2), false, 0).unwrap();
        let blocks = ledger.blocks(0, 2).unwrap();

        let reopened = IntegrityLedger::open(Box::new(InMemoryBlockLog::from_blocks(blocks))).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.head_hash().unwrap(), ledger.head_hash().unwrap());
        assert_eq!(reopened.succeeded_count().unwrap(), 1);

        let b2 = reopened.append_block(payload(3), true, 2).unwrap();
        assert_eq!(b2.index, 2);
        assert_eq!(b2.prev_hash, ledger.head_hash().unwrap());
        assert!(reopened.verify_chain().unwrap().ok);
    }

    #[test]
    fn refused_append_leaves_ledger_unchanged() {
        let ledger = IntegrityLedger::open(Box::new(RefusingLog)).unwrap();
        let err = ledger.append_block(payload(1), true, 1).unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
        assert_eq!(ledger.len().unwrap(), 0);
        assert_eq!(ledger.head_hash().unwrap(), GENESIS_SENTINEL);
    }

    #[test]
    fn concurrent_appends_form_one_chain() {
        let ledger = Arc::new(IntegrityLedger::in_memory());
        let handles: Vec<_> = (0..10u8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for i in 0..10u8 {
                        ledger.append_block(payload(t * 10 + i), true, 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        assert_eq!(ledger.len().unwrap(), 100);
        let blocks = ledger.blocks(0, 100).unwrap();
        for (i, b) in blocks.iter().enumerate() {
            assert_eq!(b.index, i as u64);
        }
        assert!(ledger.verify_chain().unwrap().ok);
    }

    #[test]
    fn verify_runs_alongside_appends() {
        let ledger = Arc::new(IntegrityLedger::in_memory());
        let writer = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for i in 0..200u32 {
                    ledger.append_block(payload((i % 256) as u8), true, 1).unwrap();
                }
            })
        };
        for _ in 0..20 {
            let report = ledger.verify_chain().unwrap();
            assert!(report.ok);
        }
        writer.join().unwrap();
        assert_eq!(ledger.verify_chain().unwrap().blocks_checked, 200);
    }

    #[test]
    fn file_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let head = {
            let log = FileBlockLog::open(&path, SyncMode::EveryWrite).unwrap();
            let ledger = IntegrityLedger::open(Box::new(log)).unwrap();
            ledger.append_block(payload(1), true, 5).unwrap();
            ledger.append_block(payload(2), false, 0).unwrap();
            ledger.head_hash().unwrap()
        };

        let log = FileBlockLog::open(&path, SyncMode::EveryWrite).unwrap();
        let ledger = IntegrityLedger::open(Box::new(log)).unwrap();
        assert_eq!(ledger.len().unwrap(), 2);
        assert_eq!(ledger.head_hash().unwrap(), head);
        assert!(ledger.verify_chain().unwrap().ok);
    }

    #[test]
    fn file_ledger_edit_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let log = FileBlockLog::open(&path, SyncMode::OsDefault).unwrap();
        let ledger = IntegrityLedger::open(Box::new(log)).unwrap();
        for i in 0..4 {
            ledger.append_block(payload(i), true, 1).unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = text.lines().map(str::to_owned).collect();
        let mut block: Block = serde_json::from_str(&lines[2]).unwrap();
        block.ack_count = 4;
        lines[2] = serde_json::to_string(&block).unwrap();
        std::fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();

        let report = ledger.verify_chain().unwrap();
        assert_eq!(report.first_divergent_index, Some(2));
    }

    #[test]
    fn undecodable_block_is_divergent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let log = FileBlockLog::open(&path, SyncMode::OsDefault).unwrap();
        let ledger = IntegrityLedger::open(Box::new(log)).unwrap();
        for i in 0..3 {
            ledger.append_block(payload(i), true, 1).unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines[0] = "{}";
        std::fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();

        let report = ledger.verify_chain().unwrap();
        assert!(!report.ok);
        assert_eq!(report.first_divergent_index, Some(0));
    }

    proptest::proptest! {
        #[test]
        fn any_single_field_edit_is_caught(
            len in 1usize..12,
            target in 0usize..12,
            field in 0u8..5,
        ) {
            let target = target % len;
            let ledger = IntegrityLedger::in_memory();
            for i in 0..len {
                ledger.append_block(payload(i as u8), true, 1).unwrap();
            }
            let mut blocks = ledger.blocks(0, len as u64).unwrap();
            let b = &mut blocks[target];
            match field {
                0 => b.payload_hash = payload(0xfe),
                1 => b.prev_hash = payload(0xfd),
                2 => b.timestamp = Timestamp::new(b.timestamp.unix_ms + 1, b.timestamp.logical),
                3 => b.succeeded = !b.succeeded,
                _ => b.ack_count += 7,
            }
            let restored = IntegrityLedger::open(Box::new(InMemoryBlockLog::from_blocks(blocks))).unwrap();
            let report = restored.verify_chain().unwrap();
            proptest::prop_assert_eq!(report.first_divergent_index, Some(target as u64));
        }
    }
}
