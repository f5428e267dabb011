use super::UnspentCoins;
use bitcoin::{BlockHash, Txid};

/// Everything needed to disconnect one block from the coin store.
///
/// Records are appended under a monotonically increasing sequence number
/// and consumed strictly last-in first-out. Applying one entry removes
/// the records the block created and restores the pre-block state of
/// every record it modified, byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindData {
    /// The tip the store returns to once this entry is applied.
    pub previous_tip: BlockHash,
    /// Transactions created by the block; their records are deleted.
    pub to_remove: Vec<Txid>,
    /// Pre-block snapshots of records the block spent from.
    pub to_restore: Vec<UnspentCoins>,
}

impl RewindData {
    pub fn new(previous_tip: BlockHash) -> Self {
        Self {
            previous_tip,
            to_remove: Vec::new(),
            to_restore: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_restore.is_empty()
    }
}
