use super::{BlockContext, ConsensusRule, RuleId};
use crate::{
    error::{ConsensusError, EngineError},
    primitives::TransactionExt,
    protocol::LockFlags,
};

/// Every transaction's lock time must have matured by this block. Which
/// clock applies depends on the flags the activation rule resolved.
pub struct TransactionFinality;

impl ConsensusRule for TransactionFinality {
    fn id(&self) -> RuleId {
        RuleId::TransactionFinality
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        let time = if ctx.flags.lock.contains(LockFlags::MEDIAN_TIME_PAST) {
            ctx.chain.median_time_past(&ctx.prev)
        } else {
            ctx.block.header.time
        };

        let height = ctx.height();
        for tx in &ctx.block.txdata {
            if !tx.is_final_at(height, time) {
                return Err(ConsensusError::NonFinal.into());
            }
        }

        Ok(())
    }
}
