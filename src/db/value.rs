use crate::coins::{codec, BlockStake, Coins, RewindData, UnspentCoins};
use crate::protocol::StakeFlags;
use bitcoin::consensus::{encode, Decodable, Encodable};
use bitcoin::io::Read;
use bitcoin::{BlockHash, Txid};

pub trait DBValue: Sized {
    fn decode(bytes: &[u8]) -> Result<Self, encode::Error>;
    fn encode(&self) -> Result<Vec<u8>, encode::Error>;
}

impl<T: Decodable + Encodable> DBValue for T {
    fn decode(bytes: &[u8]) -> Result<T, encode::Error> {
        encode::deserialize(bytes)
    }

    fn encode(&self) -> Result<Vec<u8>, encode::Error> {
        let mut encoder = Vec::new();
        T::consensus_encode(self, &mut encoder)?;
        Ok(encoder)
    }
}

impl DBValue for Coins {
    fn decode(bytes: &[u8]) -> Result<Self, encode::Error> {
        codec::decode_coins(bytes)
    }

    fn encode(&self) -> Result<Vec<u8>, encode::Error> {
        codec::encode_coins(self)
    }
}

impl DBValue for RewindData {
    fn decode(bytes: &[u8]) -> Result<Self, encode::Error> {
        let mut decoder = bytes;
        let previous_tip = BlockHash::consensus_decode(&mut decoder)?;

        let count = u32::consensus_decode(&mut decoder)?;
        let mut to_remove = Vec::new();
        for _ in 0..count {
            to_remove.push(Txid::consensus_decode(&mut decoder)?);
        }

        let count = u32::consensus_decode(&mut decoder)?;
        let mut to_restore = Vec::new();
        for _ in 0..count {
            let txid = Txid::consensus_decode(&mut decoder)?;
            let len = u32::consensus_decode(&mut decoder)? as usize;
            if len > codec::MAX_COIN_RECORD_SIZE {
                return Err(encode::Error::ParseFailed("oversized coin record"));
            }
            let mut raw = vec![0u8; len];
            decoder.read_exact(&mut raw)?;
            to_restore.push(UnspentCoins {
                txid,
                coins: codec::decode_coins(&raw)?,
            });
        }

        Ok(RewindData {
            previous_tip,
            to_remove,
            to_restore,
        })
    }

    fn encode(&self) -> Result<Vec<u8>, encode::Error> {
        let mut encoder = Vec::new();
        self.previous_tip.consensus_encode(&mut encoder)?;

        (self.to_remove.len() as u32).consensus_encode(&mut encoder)?;
        for txid in &self.to_remove {
            txid.consensus_encode(&mut encoder)?;
        }

        (self.to_restore.len() as u32).consensus_encode(&mut encoder)?;
        for unspent in &self.to_restore {
            unspent.txid.consensus_encode(&mut encoder)?;
            let raw = codec::encode_coins(&unspent.coins)?;
            (raw.len() as u32).consensus_encode(&mut encoder)?;
            encoder.extend_from_slice(&raw);
        }

        Ok(encoder)
    }
}

impl DBValue for BlockStake {
    fn decode(bytes: &[u8]) -> Result<Self, encode::Error> {
        let mut decoder = bytes;
        let bits = u32::consensus_decode(&mut decoder)?;
        let flags = StakeFlags::from_bits_truncate(bits);
        let mut modifier = [0u8; 32];
        decoder.read_exact(&mut modifier)?;
        let time = u32::consensus_decode(&mut decoder)?;
        Ok(BlockStake {
            flags,
            modifier,
            time,
        })
    }

    fn encode(&self) -> Result<Vec<u8>, encode::Error> {
        let mut encoder = Vec::with_capacity(4 + 32 + 4);
        self.flags.bits().consensus_encode(&mut encoder)?;
        encoder.extend_from_slice(&self.modifier);
        self.time.consensus_encode(&mut encoder)?;
        Ok(encoder)
    }
}
