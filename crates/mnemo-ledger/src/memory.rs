use std::sync::RwLock;

use crate::block::Block;
use crate::error::{LedgerError, LedgerResult};
use crate::traits::BlockLog;

/// In-memory block log for tests and embedding.
///
/// Blocks live in a `Vec` behind a `RwLock` and are lost when the log is
/// dropped.
#[derive(Debug, Default)]
pub struct InMemoryBlockLog {
    blocks: RwLock<Vec<Block>>,
}

impl InMemoryBlockLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a log from previously exported blocks, as stored.
    ///
    /// No verification is performed; use
    /// [`IntegrityLedger::verify_chain`](crate::IntegrityLedger::verify_chain)
    /// to check what was restored.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: RwLock::new(blocks),
        }
    }
}

impl BlockLog for InMemoryBlockLog {
    fn append(&self, block: &Block) -> LedgerResult<()> {
        let mut blocks = self.blocks.write().map_err(|_| LedgerError::LockPoisoned)?;
        let expected = blocks.len() as u64;
        if block.index != expected {
            return Err(LedgerError::OutOfOrder {
                expected,
                found: block.index,
            });
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn read_range(&self, from: u64, to: u64) -> LedgerResult<Vec<Block>> {
        if from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let blocks = self.blocks.read().map_err(|_| LedgerError::LockPoisoned)?;
        let len = blocks.len() as u64;
        let (from, to) = (from.min(len) as usize, to.min(len) as usize);
        Ok(blocks[from..to].to_vec())
    }

    fn len(&self) -> LedgerResult<u64> {
        let blocks = self.blocks.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(blocks.len() as u64)
    }
}
