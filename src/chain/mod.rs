use crate::protocol::{
    consensus::MEDIAN_TIMESPAN, NetworkParams, VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_MASK,
};
use bitcoin::{
    block, blockdata::constants::genesis_block, Block, BlockHash, CompactTarget, TxMerkleNode,
};
use std::collections::HashMap;

/// An entry in the header chain.
/// Essentially a block header with its height in the chain specified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub hash: BlockHash,
    pub version: i32,
    pub prev_block: BlockHash,
    pub merkle_root: TxMerkleNode,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Height of this entry in the chain
    pub height: u32,
}

impl ChainEntry {
    /// Create a chain entry from a block header and previous chain entry (unless genesis)
    pub fn from_block_header(header: &block::Header, prev: Option<&Self>) -> Self {
        Self {
            hash: header.block_hash(),
            version: header.version.to_consensus(),
            prev_block: header.prev_blockhash,
            merkle_root: header.merkle_root,
            time: header.time,
            bits: header.bits.to_consensus(),
            nonce: header.nonce,
            height: match prev {
                Some(prev) => prev.height + 1,
                None => 0,
            },
        }
    }

    /// Create a chain entry from a block and previous chain entry (unless genesis)
    pub fn from_block(block: &Block, prev: Option<&Self>) -> Self {
        Self::from_block_header(&block.header, prev)
    }

    /// Whether the entry is for the genesis block
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    // does this entry signal for a certain version bit
    pub fn has_bit(&self, bit: u8) -> bool {
        (self.version & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS
            && (self.version & (1 << bit)) != 0
    }
}

impl From<&ChainEntry> for block::Header {
    fn from(entry: &ChainEntry) -> Self {
        Self {
            version: block::Version::from_consensus(entry.version),
            prev_blockhash: entry.prev_block,
            merkle_root: entry.merkle_root,
            time: entry.time,
            bits: CompactTarget::from_consensus(entry.bits),
            nonce: entry.nonce,
        }
    }
}

/// Read access to the header chain the validator runs against. Header
/// management lives outside this crate, the validator only ever looks
/// backwards from a block's parent.
pub trait HeaderChain: Send + Sync {
    fn entry(&self, hash: &BlockHash) -> Option<ChainEntry>;

    /// Entry at `height` on the branch leading to `entry`
    fn ancestor(&self, entry: &ChainEntry, height: u32) -> Option<ChainEntry> {
        if height > entry.height {
            return None;
        }
        let mut cursor = *entry;
        while cursor.height > height {
            cursor = self.entry(&cursor.prev_block)?;
        }
        Some(cursor)
    }

    /// Median of the last eleven block times ending at `entry`
    fn median_time_past(&self, entry: &ChainEntry) -> u32 {
        let mut times = Vec::with_capacity(MEDIAN_TIMESPAN);
        let mut cursor = Some(*entry);
        while let Some(c) = cursor {
            times.push(c.time);
            if times.len() == MEDIAN_TIMESPAN || c.is_genesis() {
                break;
            }
            cursor = self.entry(&c.prev_block);
        }
        times.sort_unstable();
        times[times.len() / 2]
    }
}

/// In memory header index with a single best branch. Side branch headers are
/// kept by hash so ancestor walks still work for blocks that fail validation
/// or arrive out of order.
pub struct HeaderIndex {
    by_hash: HashMap<BlockHash, ChainEntry>,
    by_height: HashMap<u32, BlockHash>,
    tip: BlockHash,
}

impl HeaderIndex {
    pub fn new(params: &NetworkParams) -> Self {
        let genesis = ChainEntry::from_block(&genesis_block(params.network), None);
        let mut by_hash = HashMap::new();
        let mut by_height = HashMap::new();
        by_hash.insert(genesis.hash, genesis);
        by_height.insert(0, genesis.hash);
        Self {
            by_hash,
            by_height,
            tip: genesis.hash,
        }
    }

    pub fn insert(&mut self, entry: ChainEntry) {
        if entry.prev_block == self.tip {
            self.by_height.insert(entry.height, entry.hash);
            self.tip = entry.hash;
        }
        self.by_hash.insert(entry.hash, entry);
    }

    pub fn tip(&self) -> ChainEntry {
        self.by_hash[&self.tip]
    }

    pub fn entry_by_height(&self, height: u32) -> Option<ChainEntry> {
        self.by_hash.get(self.by_height.get(&height)?).copied()
    }

    fn is_main(&self, entry: &ChainEntry) -> bool {
        self.by_height.get(&entry.height) == Some(&entry.hash)
    }
}

impl HeaderChain for HeaderIndex {
    fn entry(&self, hash: &BlockHash) -> Option<ChainEntry> {
        self.by_hash.get(hash).copied()
    }

    fn ancestor(&self, entry: &ChainEntry, height: u32) -> Option<ChainEntry> {
        if height > entry.height {
            return None;
        }
        if self.is_main(entry) {
            return self.entry_by_height(height);
        }
        let mut cursor = *entry;
        while cursor.height > height {
            cursor = self.entry(&cursor.prev_block)?;
        }
        Some(cursor)
    }
}

// Lets validation hold a shared handle while headers keep arriving.
impl HeaderChain for parking_lot::RwLock<HeaderIndex> {
    fn entry(&self, hash: &BlockHash) -> Option<ChainEntry> {
        self.read().entry(hash)
    }

    fn ancestor(&self, entry: &ChainEntry, height: u32) -> Option<ChainEntry> {
        self.read().ancestor(entry, height)
    }

    fn median_time_past(&self, entry: &ChainEntry) -> u32 {
        self.read().median_time_past(entry)
    }
}
