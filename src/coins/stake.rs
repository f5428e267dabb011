use crate::protocol::StakeFlags;
use bitcoin::{Block, OutPoint, Transaction};

/// Per-block stake metadata, persisted next to the coin records on
/// proof-of-stake chains and written in the same atomic batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStake {
    pub flags: StakeFlags,
    /// Stake modifier, filled in by the kernel validator.
    pub modifier: [u8; 32],
    pub time: u32,
}

impl BlockStake {
    pub fn from_block(block: &Block) -> Self {
        let flags = if block.txdata.get(1).map_or(false, is_coinstake) {
            StakeFlags::PROOF_OF_STAKE
        } else {
            StakeFlags::empty()
        };
        BlockStake {
            flags,
            modifier: [0u8; 32],
            time: block.header.time,
        }
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags.contains(StakeFlags::PROOF_OF_STAKE)
    }
}

/// A coinstake transaction spends real inputs but leaves its first
/// output empty as a marker.
pub fn is_coinstake(tx: &Transaction) -> bool {
    if tx.input.is_empty() || tx.output.len() < 2 {
        return false;
    }
    if tx.input[0].previous_output == OutPoint::null() {
        return false;
    }
    let marker = &tx.output[0];
    marker.value.to_sat() == 0 && marker.script_pubkey.is_empty()
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::{
        absolute, transaction, Amount, ScriptBuf, Sequence, TxIn, TxOut, Txid, Witness,
    };
    use bitcoin::hashes::Hash;

    #[test]
    fn coinstake_shape() {
        let spend = TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array([9u8; 32]),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };
        let marker = TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::new(),
        };
        let payout = TxOut {
            value: Amount::from_sat(5_000),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        };

        let coinstake = Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: vec![spend.clone()],
            output: vec![marker, payout.clone()],
        };
        assert!(is_coinstake(&coinstake));

        // a normal spend has a non-empty first output
        let plain = Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: vec![spend],
            output: vec![payout.clone(), payout],
        };
        assert!(!is_coinstake(&plain));
    }
}
