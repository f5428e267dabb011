use crate::protocol::ChainVariant;
use bitcoin::{Transaction, TxOut, Txid};

use super::is_coinstake;

/// The unspent outputs of a single transaction.
///
/// Outputs are stored positionally; a `None` slot is an output that has
/// been spent (or was never spendable). Trailing spent slots are trimmed
/// so a record with no remaining outputs collapses to an empty vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coins {
    /// Transaction version, kept for serialization compatibility.
    pub version: i32,
    /// Height of the block that created the transaction.
    pub height: u32,
    /// Whether the transaction was a coinbase.
    pub coinbase: bool,
    /// One slot per output index, `None` once spent.
    pub outputs: Vec<Option<TxOut>>,
    /// Proof-of-stake trailer, present only on stake chains.
    pub stake: Option<CoinStake>,
}

/// Per-transaction stake metadata carried on proof-of-stake chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinStake {
    pub coinstake: bool,
    pub time: u32,
}

/// A coin record tagged with the transaction it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentCoins {
    pub txid: Txid,
    pub coins: Coins,
}

impl Coins {
    /// Capture the outputs of a transaction as a fresh record.
    /// Provably unspendable outputs are recorded as already spent
    /// because they can never be spent in the future.
    pub fn from_tx(tx: &Transaction, height: u32, time: u32, variant: ChainVariant) -> Coins {
        let outputs = tx
            .output
            .iter()
            .map(|output| {
                if output.script_pubkey.is_op_return() {
                    None
                } else {
                    Some(output.clone())
                }
            })
            .collect();
        let mut coins = Coins {
            version: tx.version.0,
            height,
            coinbase: tx.is_coinbase(),
            outputs,
            stake: if variant.has_stake_data() {
                Some(CoinStake {
                    coinstake: is_coinstake(tx),
                    time,
                })
            } else {
                None
            },
        };
        coins.trim();
        coins
    }

    pub fn is_available(&self, vout: u32) -> bool {
        matches!(self.outputs.get(vout as usize), Some(Some(_)))
    }

    pub fn output(&self, vout: u32) -> Option<&TxOut> {
        self.outputs.get(vout as usize)?.as_ref()
    }

    /// Take an output out of the record, trimming trailing spent slots.
    /// Returns `None` if the output does not exist or was already spent.
    pub fn spend(&mut self, vout: u32) -> Option<TxOut> {
        let output = self.outputs.get_mut(vout as usize)?.take()?;
        self.trim();
        Some(output)
    }

    pub fn trim(&mut self) {
        while matches!(self.outputs.last(), Some(None)) {
            self.outputs.pop();
        }
    }

    /// A record with no unspent outputs carries no information and is
    /// deleted from the store instead of being written back.
    pub fn is_prunable(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().flatten().count()
    }
}

impl Default for Coins {
    fn default() -> Self {
        Coins {
            version: 1,
            height: 0,
            coinbase: false,
            outputs: Vec::new(),
            stake: None,
        }
    }
}
