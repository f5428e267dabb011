use super::{BlockContext, ConsensusRule, RuleId};
use crate::{
    coins::BlockStake,
    error::{ConsensusError, EngineError},
    view::CoinChanges,
};
use log::debug;
use std::mem;

/// Applies the block to the coin view: spends every input, adds every
/// created output, and saves the result together with its undo record in
/// one atomic call.
pub struct ConnectCoins;

impl ConsensusRule for ConnectCoins {
    fn id(&self) -> RuleId {
        RuleId::ConnectCoins
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        let block = ctx.block;
        let entry = ctx.entry;
        let prev = ctx.prev;
        let variant = ctx.network.variant;

        for (index, tx) in block.txdata.iter().enumerate() {
            if index > 0 {
                for input in &tx.input {
                    // proven available by the input checks, barring a racing
                    // tip change which the save below would catch anyway
                    if ctx.set.spend(&input.previous_output).is_none() {
                        return Err(ConsensusError::InputsMissingOrSpent.into());
                    }
                }
            }
            ctx.set
                .add_tx(tx, ctx.txids[index], entry.height, block.header.time, variant);
        }

        let set = mem::take(&mut ctx.set);
        let (unspents, rewind) = set.into_changes(prev.hash);

        let stake = if variant.has_stake_data() {
            vec![(entry.hash, BlockStake::from_block(block))]
        } else {
            vec![]
        };

        ctx.view.save_changes(CoinChanges {
            unspents,
            undo: vec![rewind],
            stake,
            expected_tip: prev.hash,
            new_tip: entry.hash,
        })?;

        debug!("connected block {} at height {}", entry.hash, entry.height);

        Ok(())
    }
}
