use crate::block::Block;
use crate::error::LedgerResult;

/// Storage boundary for ledger blocks.
///
/// Implementations must satisfy:
/// - Blocks are appended in index order; `append` rejects a gap or repeat.
/// - A block is readable only after `append` returned `Ok`.
/// - Reads may run concurrently with an append and see a consistent prefix.
/// - There is no way to modify or remove a block once appended.
pub trait BlockLog: Send + Sync {
    /// Durably append the next block.
    fn append(&self, block: &Block) -> LedgerResult<()>;

    /// Read blocks in `[from, to)`.
    fn read_range(&self, from: u64, to: u64) -> LedgerResult<Vec<Block>>;

    /// Number of blocks stored.
    fn len(&self) -> LedgerResult<u64>;

    /// Returns `true` if no blocks are stored.
    fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The most recently appended block.
    fn last(&self) -> LedgerResult<Option<Block>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        Ok(self.read_range(len - 1, len)?.pop())
    }

    /// Flush buffered state to the medium.
    fn flush(&self) -> LedgerResult<()> {
        Ok(())
    }
}
