use super::{Coins, RewindData, UnspentCoins};
use crate::protocol::ChainVariant;
use bitcoin::{BlockHash, OutPoint, Transaction, TxOut, Txid};
use std::collections::{BTreeSet, HashMap};

/// The working set of coin records touched while connecting one block.
///
/// Records fetched from the view are snapshotted before any mutation so
/// the set can emit both the post-block records to persist and the undo
/// entry that reverses them.
#[derive(Debug, Default)]
pub struct UnspentOutputSet {
    coins: HashMap<Txid, Coins>,
    snapshots: HashMap<Txid, Coins>,
    touched: BTreeSet<Txid>,
    created: Vec<Txid>,
}

impl UnspentOutputSet {
    /// Add a record loaded from the view, keeping its pre-block state.
    pub fn insert_fetched(&mut self, txid: Txid, coins: Coins) {
        self.snapshots.insert(txid, coins.clone());
        self.coins.insert(txid, coins);
    }

    pub fn coins(&self, txid: &Txid) -> Option<&Coins> {
        self.coins.get(txid)
    }

    pub fn is_available(&self, outpoint: &OutPoint) -> bool {
        self.coins
            .get(&outpoint.txid)
            .map_or(false, |coins| coins.is_available(outpoint.vout))
    }

    pub fn output(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.coins.get(&outpoint.txid)?.output(outpoint.vout)
    }

    /// Spend one output. The record stays in the set (possibly with no
    /// outputs left) so the fully spent state is written back as a
    /// deletion. Returns `None` when the output is missing or spent.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<TxOut> {
        let coins = self.coins.get_mut(&outpoint.txid)?;
        let output = coins.spend(outpoint.vout)?;
        self.touched.insert(outpoint.txid);
        Some(output)
    }

    /// Record the outputs a transaction creates. Replacing a fetched
    /// record counts as a mutation so the old record lands in the undo
    /// data instead of being deleted outright.
    pub fn add_tx(
        &mut self,
        tx: &Transaction,
        txid: Txid,
        height: u32,
        time: u32,
        variant: ChainVariant,
    ) {
        let record = Coins::from_tx(tx, height, time, variant);
        self.coins.insert(txid, record);
        if self.snapshots.contains_key(&txid) {
            self.touched.insert(txid);
        } else if !self.created.contains(&txid) {
            self.created.push(txid);
        }
    }

    /// Fold the set into the records to persist and the undo entry that
    /// reverses them.
    pub fn into_changes(self, previous_tip: BlockHash) -> (Vec<UnspentCoins>, RewindData) {
        let mut unspents = Vec::with_capacity(self.created.len() + self.touched.len());
        let mut rewind = RewindData::new(previous_tip);

        for txid in &self.created {
            if let Some(coins) = self.coins.get(txid) {
                unspents.push(UnspentCoins {
                    txid: *txid,
                    coins: coins.clone(),
                });
            }
            rewind.to_remove.push(*txid);
        }

        for txid in &self.touched {
            let snapshot = match self.snapshots.get(txid) {
                Some(snapshot) => snapshot,
                // created in this block, already handled above
                None => continue,
            };
            if let Some(coins) = self.coins.get(txid) {
                unspents.push(UnspentCoins {
                    txid: *txid,
                    coins: coins.clone(),
                });
            }
            rewind.to_restore.push(UnspentCoins {
                txid: *txid,
                coins: snapshot.clone(),
            });
        }

        (unspents, rewind)
    }
}
