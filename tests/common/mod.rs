#![allow(dead_code)]

use bitcoin::{
    absolute, block, blockdata::script::Builder, hashes::Hash, transaction, Amount, Block,
    CompactTarget, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxMerkleNode, TxOut,
    Witness,
};
use chainstate::{chain::ChainEntry, protocol::NetworkParams};

pub fn init_logger() {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .is_test(true)
        .try_init();
}

pub fn regtest() -> NetworkParams {
    NetworkParams::from_network(Network::Regtest)
}

/// A p2pkh script with a recognizable hash so every tag pays somewhere else
pub fn p2pkh(tag: u8) -> ScriptBuf {
    let mut bytes = vec![0x76, 0xa9, 0x14];
    bytes.extend_from_slice(&[tag; 20]);
    bytes.extend_from_slice(&[0x88, 0xac]);
    ScriptBuf::from_bytes(bytes)
}

pub fn coinbase(height: u32, value: u64, tag: u8) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Builder::new()
                .push_int(height as i64)
                .push_int(tag as i64)
                .into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: p2pkh(tag),
        }],
    }
}

pub fn spend(from: OutPoint, value: u64, tag: u8) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: from,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: p2pkh(tag),
        }],
    }
}

pub fn build_block(prev: &ChainEntry, version: i32, time: u32, txdata: Vec<Transaction>) -> Block {
    let mut block = Block {
        header: block::Header {
            version: block::Version::from_consensus(version),
            prev_blockhash: prev.hash,
            merkle_root: TxMerkleNode::all_zeros(),
            time,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: 0,
        },
        txdata,
    };
    block.header.merkle_root = block
        .compute_merkle_root()
        .unwrap_or_else(TxMerkleNode::all_zeros);
    block
}

pub fn next_block(prev: &ChainEntry, txdata: Vec<Transaction>) -> Block {
    build_block(prev, 4, prev.time + 600, txdata)
}
