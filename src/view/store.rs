use super::{CoinChanges, CoinView, FetchCoinsResponse};
use crate::{
    coins::{BlockStake, Coins, RewindData},
    db::{Batch, DBKey, Database, DiskDatabase, IterMode},
    error::{CoinViewError, DBError},
    protocol::NetworkParams,
};
use bitcoin::{hashes::Hash, BlockHash, Txid};
use log::{info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;

/// State owned by the single logical writer. Guarded by a mutex so
/// concurrent callers queue and see each other's writes in order.
struct WriterSession {
    tip: BlockHash,
    /// Sequence number the next undo record will be stored under
    next_undo: u64,
}

/// Durable coin view backed by an embedded key value store. One column per
/// namespace: coin records, the undo log, the tip record and stake side data.
pub struct StoreCoinView {
    db: DiskDatabase,
    genesis_hash: BlockHash,
    session: Mutex<WriterSession>,
}

impl StoreCoinView {
    pub fn open(path: PathBuf, network: &NetworkParams) -> Result<Self, CoinViewError> {
        let db = DiskDatabase::new(path, key::columns())?;

        let tip = match db.get(Key::Tip)? {
            Some(tip) => {
                info!("coin store loaded, tip {}", tip);
                tip
            }
            None => {
                let mut batch = Batch::new();
                batch
                    .insert(Key::Tip, &network.genesis_hash)
                    .map_err(DBError::from)?;
                db.write_batch(batch)?;
                info!("coin store initialized, tip {}", network.genesis_hash);
                network.genesis_hash
            }
        };

        // The undo log is keyed big endian so the last key is the highest
        // sequence written.
        let next_undo = db
            .iter_cf::<Key, RewindData>(COL_UNDO, IterMode::End)?
            .next()
            .map(|(raw, _)| -> Result<u64, DBError> {
                let bytes: [u8; 8] = raw
                    .as_ref()
                    .try_into()
                    .map_err(|_| DBError::Other("bad undo key"))?;
                Ok(u64::from_be_bytes(bytes) + 1)
            })
            .transpose()?
            .unwrap_or(0);

        Ok(Self {
            db,
            genesis_hash: network.genesis_hash,
            session: Mutex::new(WriterSession { tip, next_undo }),
        })
    }

    /// Delete every coin and stake record and point the tip back at genesis.
    /// Last resort when rewinding past the start of the undo log.
    fn reset_to_genesis(&self, session: &mut WriterSession) -> Result<BlockHash, CoinViewError> {
        let mut batch = Batch::new();

        for (raw, _) in self.db.iter_cf::<Key, Coins>(COL_COINS, IterMode::Start)? {
            batch.remove(Key::Coins(txid_from_raw(&raw)?));
        }
        for (raw, _) in self
            .db
            .iter_cf::<Key, BlockStake>(COL_STAKE, IterMode::Start)?
        {
            batch.remove(Key::Stake(hash_from_raw(&raw)?));
        }
        batch
            .insert(Key::Tip, &self.genesis_hash)
            .map_err(DBError::from)?;

        self.db.write_batch(batch)?;
        session.tip = self.genesis_hash;

        warn!("undo log exhausted, coin store reset to genesis");

        Ok(self.genesis_hash)
    }
}

impl CoinView for StoreCoinView {
    fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse, CoinViewError> {
        let session = self.session.lock();

        let mut coins = Vec::with_capacity(txids.len());
        for txid in txids {
            coins.push(self.db.get(Key::Coins(*txid))?);
        }

        Ok(FetchCoinsResponse {
            coins,
            tip: session.tip,
        })
    }

    fn tip(&self) -> Result<BlockHash, CoinViewError> {
        Ok(self.session.lock().tip)
    }

    fn save_changes(&self, changes: CoinChanges) -> Result<(), CoinViewError> {
        let mut session = self.session.lock();

        if changes.expected_tip != session.tip {
            return Err(CoinViewError::TipMismatch {
                expected: changes.expected_tip,
                found: session.tip,
            });
        }

        let mut batch = Batch::new();

        for unspent in &changes.unspents {
            if unspent.coins.is_prunable() {
                batch.remove(Key::Coins(unspent.txid));
            } else {
                batch
                    .insert(Key::Coins(unspent.txid), &unspent.coins)
                    .map_err(DBError::from)?;
            }
        }

        let undo_count = changes.undo.len() as u64;
        for (i, rewind) in changes.undo.iter().enumerate() {
            batch
                .insert(Key::Undo(session.next_undo + i as u64), rewind)
                .map_err(DBError::from)?;
        }

        for (hash, stake) in &changes.stake {
            batch
                .insert(Key::Stake(*hash), stake)
                .map_err(DBError::from)?;
        }

        batch
            .insert(Key::Tip, &changes.new_tip)
            .map_err(DBError::from)?;

        self.db.write_batch(batch)?;

        session.tip = changes.new_tip;
        session.next_undo += undo_count;

        Ok(())
    }

    fn rewind(&self) -> Result<BlockHash, CoinViewError> {
        let mut session = self.session.lock();

        if session.next_undo == 0 {
            if session.tip == self.genesis_hash {
                return Err(CoinViewError::RewindExhausted);
            }
            return self.reset_to_genesis(&mut session);
        }

        let seq = session.next_undo - 1;
        let rewind: RewindData = self
            .db
            .get(Key::Undo(seq))?
            .ok_or(DBError::Other("missing undo record"))?;

        let mut batch = Batch::new();
        for txid in &rewind.to_remove {
            batch.remove(Key::Coins(*txid));
        }
        for unspent in &rewind.to_restore {
            batch
                .insert(Key::Coins(unspent.txid), &unspent.coins)
                .map_err(DBError::from)?;
        }
        batch.remove(Key::Stake(session.tip));
        batch.remove(Key::Undo(seq));
        batch
            .insert(Key::Tip, &rewind.previous_tip)
            .map_err(DBError::from)?;

        self.db.write_batch(batch)?;

        session.tip = rewind.previous_tip;
        session.next_undo = seq;

        Ok(rewind.previous_tip)
    }

    fn block_stake(&self, hash: &BlockHash) -> Result<Option<BlockStake>, CoinViewError> {
        Ok(self.db.get(Key::Stake(*hash))?)
    }
}

fn txid_from_raw(raw: &[u8]) -> Result<Txid, DBError> {
    let mut bytes: [u8; 32] = raw.try_into().map_err(|_| DBError::Other("bad coin key"))?;
    bytes.reverse();
    Ok(Txid::from_byte_array(bytes))
}

fn hash_from_raw(raw: &[u8]) -> Result<BlockHash, DBError> {
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| DBError::Other("bad stake key"))?;
    Ok(BlockHash::from_byte_array(bytes))
}

use key::*;

mod key {
    use super::*;
    use bitcoin::consensus::{encode::WriteExt, Encodable};
    use bitcoin::io;

    pub const COL_COINS: &str = "C";
    pub const COL_UNDO: &str = "U";
    pub const COL_META: &str = "M";
    pub const COL_STAKE: &str = "S";

    pub const KEY_TIP: [u8; 1] = [0];

    pub fn columns() -> Vec<&'static str> {
        vec![COL_COINS, COL_UNDO, COL_META, COL_STAKE]
    }

    pub enum Key {
        Coins(Txid),
        Undo(u64),
        Tip,
        Stake(BlockHash),
    }

    impl DBKey for Key {
        fn col(&self) -> &'static str {
            match self {
                Key::Coins(_) => COL_COINS,
                Key::Undo(_) => COL_UNDO,
                Key::Tip => COL_META,
                Key::Stake(_) => COL_STAKE,
            }
        }
    }

    impl Encodable for Key {
        fn consensus_encode<W: io::Write + ?Sized>(
            &self,
            e: &mut W,
        ) -> Result<usize, io::Error> {
            Ok(match self {
                // Stored in display order so records sort by txid as printed
                Key::Coins(txid) => {
                    let mut bytes = txid.to_byte_array();
                    bytes.reverse();
                    e.emit_slice(&bytes)?;
                    bytes.len()
                }
                // Big endian so sequence numbers sort numerically
                Key::Undo(seq) => {
                    e.emit_slice(&seq.to_be_bytes())?;
                    8
                }
                Key::Tip => {
                    e.emit_slice(&KEY_TIP)?;
                    KEY_TIP.len()
                }
                Key::Stake(hash) => hash.consensus_encode(e)?,
            })
        }
    }
}
