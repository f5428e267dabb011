use super::{CoinChanges, CoinView, FetchCoinsResponse};
use crate::{
    coins::{BlockStake, Coins, UnspentCoins},
    error::CoinViewError,
    protocol::NetworkParams,
};
use bitcoin::{BlockHash, Txid};
use parking_lot::RwLock;
use std::collections::HashMap;

struct Inner {
    coins: HashMap<Txid, Coins>,
    stake: HashMap<BlockHash, BlockStake>,
    tip: BlockHash,
}

/// Map backed coin view for tests that never reorganize. Undo data handed to
/// `save_changes` is dropped and `rewind` always fails.
pub struct MemoryCoinView {
    inner: RwLock<Inner>,
}

impl MemoryCoinView {
    pub fn new(tip: BlockHash) -> Self {
        Self {
            inner: RwLock::new(Inner {
                coins: HashMap::new(),
                stake: HashMap::new(),
                tip,
            }),
        }
    }

    pub fn with_network(network: &NetworkParams) -> Self {
        Self::new(network.genesis_hash)
    }

    /// Seed a record directly, bypassing the tip guard
    pub fn insert(&self, unspent: UnspentCoins) {
        self.inner.write().coins.insert(unspent.txid, unspent.coins);
    }

    pub fn len(&self) -> usize {
        self.inner.read().coins.len()
    }
}

impl CoinView for MemoryCoinView {
    fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse, CoinViewError> {
        let inner = self.inner.read();
        Ok(FetchCoinsResponse {
            coins: txids.iter().map(|t| inner.coins.get(t).cloned()).collect(),
            tip: inner.tip,
        })
    }

    fn tip(&self) -> Result<BlockHash, CoinViewError> {
        Ok(self.inner.read().tip)
    }

    fn save_changes(&self, changes: CoinChanges) -> Result<(), CoinViewError> {
        let mut inner = self.inner.write();

        if changes.expected_tip != inner.tip {
            return Err(CoinViewError::TipMismatch {
                expected: changes.expected_tip,
                found: inner.tip,
            });
        }

        for unspent in changes.unspents {
            merge_record(&mut inner.coins, unspent);
        }
        for (hash, stake) in changes.stake {
            inner.stake.insert(hash, stake);
        }

        inner.tip = changes.new_tip;

        Ok(())
    }

    fn rewind(&self) -> Result<BlockHash, CoinViewError> {
        Err(CoinViewError::NotSupported)
    }

    fn block_stake(&self, hash: &BlockHash) -> Result<Option<BlockStake>, CoinViewError> {
        Ok(self.inner.read().stake.get(hash).copied())
    }
}

/// Overwrite the stored record's outputs position by position, dropping the
/// record once nothing unspent remains.
fn merge_record(map: &mut HashMap<Txid, Coins>, unspent: UnspentCoins) {
    let UnspentCoins { txid, coins } = unspent;

    let merged = match map.remove(&txid) {
        None => coins,
        Some(mut existing) => {
            if existing.outputs.len() < coins.outputs.len() {
                existing.outputs.resize(coins.outputs.len(), None);
            }
            for (i, output) in coins.outputs.into_iter().enumerate() {
                existing.outputs[i] = output;
            }
            existing.version = coins.version;
            existing.height = coins.height;
            existing.coinbase = coins.coinbase;
            existing.stake = coins.stake;
            existing.trim();
            existing
        }
    };

    if !merged.is_prunable() {
        map.insert(txid, merged);
    }
}
