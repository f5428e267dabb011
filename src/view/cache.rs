use super::{CoinChanges, CoinView, FetchCoinsResponse};
use crate::{
    coins::{BlockStake, Coins, RewindData, UnspentCoins},
    error::CoinViewError,
    protocol::CacheOptions,
};
use bitcoin::{BlockHash, Txid};
use log::debug;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Instant};

struct CacheEntry {
    /// `None` caches both "not found" and "deleted but not yet flushed"
    coins: Option<Coins>,
    dirty: bool,
}

struct CacheInner {
    records: HashMap<Txid, CacheEntry>,
    /// Tip as seen by callers of the cache
    tip: BlockHash,
    /// Tip the backend last confirmed
    backend_tip: BlockHash,
    pending_undo: Vec<RewindData>,
    pending_stake: Vec<(BlockHash, BlockStake)>,
    dirty_bytes: usize,
    last_flush: Instant,
    hits: u64,
    misses: u64,
    flushes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub flushes: u64,
}

/// Write back cache wrapping any [`CoinView`]. Saves land in memory and are
/// replayed into a single backend save when a flush is due. The backend never
/// observes a partial block, every flush moves it from one block boundary to
/// another.
pub struct CachedCoinView {
    backend: Arc<dyn CoinView>,
    options: CacheOptions,
    inner: RwLock<CacheInner>,
}

impl CachedCoinView {
    pub fn new(backend: Arc<dyn CoinView>, options: CacheOptions) -> Result<Self, CoinViewError> {
        let tip = backend.tip()?;
        Ok(Self {
            backend,
            options,
            inner: RwLock::new(CacheInner {
                records: HashMap::new(),
                tip,
                backend_tip: tip,
                pending_undo: vec![],
                pending_stake: vec![],
                dirty_bytes: 0,
                last_flush: Instant::now(),
                hits: 0,
                misses: 0,
                flushes: 0,
            }),
        })
    }

    /// Push everything dirty into one backend save. With `force` unset this
    /// is a no-op until the byte threshold or flush interval is hit.
    pub fn flush(&self, force: bool) -> Result<(), CoinViewError> {
        let mut guard = self.inner.write();
        self.flush_inner(&mut guard, force)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            flushes: inner.flushes,
        }
    }

    fn flush_inner(&self, inner: &mut CacheInner, force: bool) -> Result<(), CoinViewError> {
        let due = force
            || inner.dirty_bytes >= self.options.flush_threshold_bytes
            || inner.last_flush.elapsed() >= self.options.flush_interval;
        if !due {
            return Ok(());
        }

        if inner.tip == inner.backend_tip
            && inner.pending_undo.is_empty()
            && inner.pending_stake.is_empty()
        {
            inner.last_flush = Instant::now();
            return Ok(());
        }

        let mut unspents = Vec::new();
        for (txid, entry) in inner.records.iter() {
            if entry.dirty {
                // a dropped record flushes as an empty one, which the
                // backend treats as a delete
                unspents.push(UnspentCoins {
                    txid: *txid,
                    coins: entry.coins.clone().unwrap_or_default(),
                });
            }
        }

        let record_count = unspents.len();
        let undo_count = inner.pending_undo.len();

        self.backend.save_changes(CoinChanges {
            unspents,
            undo: inner.pending_undo.clone(),
            stake: inner.pending_stake.clone(),
            expected_tip: inner.backend_tip,
            new_tip: inner.tip,
        })?;

        // forget pending state only once the backend accepted it
        inner.pending_undo.clear();
        inner.pending_stake.clear();
        for entry in inner.records.values_mut() {
            entry.dirty = false;
        }
        inner.backend_tip = inner.tip;
        inner.dirty_bytes = 0;
        inner.last_flush = Instant::now();
        inner.flushes += 1;

        if inner.records.len() > self.options.max_records {
            inner.records.clear();
        }

        debug!(
            "flushed {} coin records and {} undo records, tip {}",
            record_count, undo_count, inner.backend_tip
        );

        Ok(())
    }
}

impl CoinView for CachedCoinView {
    fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse, CoinViewError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let mut coins: Vec<Option<Coins>> = Vec::with_capacity(txids.len());
        let mut missing = Vec::new();
        let mut missing_slots = Vec::new();

        for (i, txid) in txids.iter().enumerate() {
            match inner.records.get(txid) {
                Some(entry) => {
                    inner.hits += 1;
                    coins.push(entry.coins.clone());
                }
                None => {
                    inner.misses += 1;
                    missing.push(*txid);
                    missing_slots.push(i);
                    coins.push(None);
                }
            }
        }

        if !missing.is_empty() {
            let fetched = self.backend.fetch_coins(&missing)?;
            for ((slot, txid), record) in missing_slots
                .into_iter()
                .zip(missing.into_iter())
                .zip(fetched.coins)
            {
                inner.records.insert(
                    txid,
                    CacheEntry {
                        coins: record.clone(),
                        dirty: false,
                    },
                );
                coins[slot] = record;
            }
        }

        Ok(FetchCoinsResponse {
            coins,
            tip: inner.tip,
        })
    }

    fn tip(&self) -> Result<BlockHash, CoinViewError> {
        Ok(self.inner.read().tip)
    }

    fn save_changes(&self, changes: CoinChanges) -> Result<(), CoinViewError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        if changes.expected_tip != inner.tip {
            return Err(CoinViewError::TipMismatch {
                expected: changes.expected_tip,
                found: inner.tip,
            });
        }

        for unspent in changes.unspents {
            inner.dirty_bytes += approximate_record_size(&unspent);
            let coins = if unspent.coins.is_prunable() {
                None
            } else {
                Some(unspent.coins)
            };
            inner.records.insert(
                unspent.txid,
                CacheEntry { coins, dirty: true },
            );
        }
        inner.pending_undo.extend(changes.undo);
        inner.pending_stake.extend(changes.stake);
        inner.tip = changes.new_tip;

        self.flush_inner(inner, false)
    }

    fn rewind(&self) -> Result<BlockHash, CoinViewError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        // Unflushed state is discarded, the rewind applies to what the
        // backend actually holds.
        inner.records.clear();
        inner.pending_undo.clear();
        inner.pending_stake.clear();
        inner.dirty_bytes = 0;

        let tip = self.backend.rewind()?;
        inner.tip = tip;
        inner.backend_tip = tip;

        Ok(tip)
    }

    fn block_stake(&self, hash: &BlockHash) -> Result<Option<BlockStake>, CoinViewError> {
        {
            let inner = self.inner.read();
            if let Some((_, stake)) = inner.pending_stake.iter().find(|(h, _)| h == hash) {
                return Ok(Some(*stake));
            }
        }
        self.backend.block_stake(hash)
    }
}

fn approximate_record_size(unspent: &UnspentCoins) -> usize {
    let outputs: usize = unspent
        .coins
        .outputs
        .iter()
        .map(|output| match output {
            Some(output) => 16 + output.script_pubkey.len(),
            None => 1,
        })
        .sum();
    32 + 16 + outputs
}
