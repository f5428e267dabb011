mod cache;
mod memory;
mod store;

pub use cache::{CacheStats, CachedCoinView};
pub use memory::MemoryCoinView;
pub use store::StoreCoinView;

use crate::{
    coins::{BlockStake, Coins, RewindData, UnspentCoins},
    error::CoinViewError,
};
use bitcoin::{BlockHash, Txid};

/// Coin lookups for one batch of transactions, answered against a single
/// consistent tip.
#[derive(Debug, Clone)]
pub struct FetchCoinsResponse {
    /// One slot per requested txid, in request order
    pub coins: Vec<Option<Coins>>,
    /// The tip the lookups were answered at
    pub tip: BlockHash,
}

/// Everything one connected (or checked) block changes about the coin state,
/// applied atomically by the backend.
#[derive(Debug, Clone)]
pub struct CoinChanges {
    /// Post-block coin records. A record with no unspent outputs left means
    /// delete.
    pub unspents: Vec<UnspentCoins>,
    /// Rewind records for the blocks covered by this write, oldest first
    pub undo: Vec<RewindData>,
    /// Per block stake side data, empty on proof of work chains
    pub stake: Vec<(BlockHash, BlockStake)>,
    /// The tip these changes were built against
    pub expected_tip: BlockHash,
    /// The tip after applying these changes
    pub new_tip: BlockHash,
}

/// A consistent view of the unspent coin set at some tip.
///
/// `save_changes` must refuse to apply changes built against a different tip
/// and must apply a batch atomically, a reader never observes half a block.
pub trait CoinView: Send + Sync {
    fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse, CoinViewError>;

    fn tip(&self) -> Result<BlockHash, CoinViewError>;

    fn save_changes(&self, changes: CoinChanges) -> Result<(), CoinViewError>;

    /// Undo the most recent block, returning the new tip
    fn rewind(&self) -> Result<BlockHash, CoinViewError>;

    fn block_stake(&self, hash: &BlockHash) -> Result<Option<BlockStake>, CoinViewError>;
}
