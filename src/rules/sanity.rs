use super::{BlockContext, ConsensusRule, RuleId};
use crate::{
    error::{ConsensusError, EngineError},
    primitives::TransactionExt,
    protocol::consensus::MAX_BLOCK_WEIGHT,
};
use rayon::prelude::*;

/// Context free checks on the block body: exactly one leading coinbase,
/// weight below the limit, every transaction well formed.
pub struct BlockSanity;

impl ConsensusRule for BlockSanity {
    fn id(&self) -> RuleId {
        RuleId::BlockSanity
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        let block = ctx.block;

        if block.txdata.is_empty() || !block.txdata[0].is_coinbase() {
            return Err(ConsensusError::NoCoinbase.into());
        }

        if block.weight().to_wu() > MAX_BLOCK_WEIGHT {
            return Err(ConsensusError::BadBlockWeight.into());
        }

        // per transaction checks are independent of each other
        block
            .txdata
            .par_iter()
            .enumerate()
            .try_for_each(|(index, tx)| {
                if index > 0 && tx.is_coinbase() {
                    return Err(ConsensusError::MultipleCoinbase);
                }
                tx.check_sanity()
            })?;

        Ok(())
    }
}

/// The header must commit to exactly the transactions carried in the body.
pub struct MerkleRoot;

impl ConsensusRule for MerkleRoot {
    fn id(&self) -> RuleId {
        RuleId::MerkleRoot
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        // TODO: reject merkle tree malleability from 64 byte transactions
        if !ctx.block.check_merkle_root() {
            return Err(ConsensusError::BadMerkleRoot.into());
        }

        Ok(())
    }
}
