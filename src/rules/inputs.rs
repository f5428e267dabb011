use super::{BlockContext, ConsensusRule, RuleId};
use crate::{
    error::{ConsensusError, CoinViewError, EngineError},
    primitives::TransactionExt,
    protocol::{consensus::MAX_MONEY, get_block_subsidy},
};
use bitcoin::{OutPoint, Txid};
use std::collections::{HashMap, HashSet};

/// Pulls every coin record this block touches out of the view in one batch
/// and proves each spent output is present and unspent. Outputs created
/// earlier in the same block are spendable by later transactions.
pub struct FetchCoins;

impl ConsensusRule for FetchCoins {
    fn id(&self) -> RuleId {
        RuleId::FetchCoins
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        let block = ctx.block;
        let block_txids: HashSet<Txid> = ctx.txids.iter().copied().collect();

        let mut wanted = Vec::new();
        let mut seen = HashSet::new();

        if ctx.flags.bip30 {
            for txid in &ctx.txids {
                if seen.insert(*txid) {
                    wanted.push(*txid);
                }
            }
        }
        for tx in block.txdata.iter().skip(1) {
            for input in &tx.input {
                let txid = input.previous_output.txid;
                if !block_txids.contains(&txid) && seen.insert(txid) {
                    wanted.push(txid);
                }
            }
        }

        let response = ctx.view.fetch_coins(&wanted)?;
        if response.tip != ctx.prev.hash {
            return Err(CoinViewError::TipMismatch {
                expected: ctx.prev.hash,
                found: response.tip,
            }
            .into());
        }

        for (txid, coins) in wanted.into_iter().zip(response.coins) {
            if let Some(coins) = coins {
                ctx.set.insert_fetched(txid, coins);
            }
        }

        // a live record under one of our own txids would be silently
        // overwritten by connecting this block
        if ctx.flags.bip30 {
            for txid in &ctx.txids {
                if ctx.set.coins(txid).is_some() {
                    return Err(ConsensusError::OverwriteUnspent.into());
                }
            }
        }

        let mut claimed: HashSet<OutPoint> = HashSet::new();
        let mut created: HashMap<Txid, usize> = HashMap::new();

        for (index, tx) in block.txdata.iter().enumerate() {
            if index > 0 {
                for input in &tx.input {
                    let out = input.previous_output;

                    if !claimed.insert(out) {
                        return Err(ConsensusError::InputsMissingOrSpent.into());
                    }

                    let available = match created.get(&out.txid) {
                        Some(&source_index) => {
                            let source = &block.txdata[source_index];
                            match source.output.get(out.vout as usize) {
                                Some(output) => !output.script_pubkey.is_op_return(),
                                None => false,
                            }
                        }
                        None => ctx.set.is_available(&out),
                    };

                    if !available {
                        return Err(ConsensusError::InputsMissingOrSpent.into());
                    }
                }
            }
            created.insert(ctx.txids[index], index);
        }

        ctx.in_block = created;

        Ok(())
    }
}

/// Value level input checks: maturity of spent coinbases, input totals
/// against outputs, fees, and the coinbase claim against subsidy plus fees.
pub struct CheckInputs;

impl ConsensusRule for CheckInputs {
    fn id(&self) -> RuleId {
        RuleId::CheckInputs
    }

    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        use ConsensusError::*;

        let block = ctx.block;
        let height = ctx.height();

        let mut reward: u64 = 0;

        for (index, tx) in block.txdata.iter().enumerate() {
            if index == 0 {
                continue;
            }

            let mut total_in: u64 = 0;

            for input in &tx.input {
                let out = input.previous_output;

                let (value, coin_height, coinbase) = match ctx.in_block.get(&out.txid) {
                    Some(&source_index) => {
                        let source = &block.txdata[source_index];
                        let output = source
                            .output
                            .get(out.vout as usize)
                            .ok_or(InputsMissingOrSpent)?;
                        (output.value.to_sat(), height, source.is_coinbase())
                    }
                    None => {
                        let coins = ctx.set.coins(&out.txid).ok_or(InputsMissingOrSpent)?;
                        let output = coins.output(out.vout).ok_or(InputsMissingOrSpent)?;
                        (output.value.to_sat(), coins.height, coins.coinbase)
                    }
                };

                if coinbase
                    && height.saturating_sub(coin_height) < ctx.network.coinbase_maturity
                {
                    return Err(PrematureCoinbaseSpend.into());
                }

                if value > MAX_MONEY {
                    return Err(InputValuesOutOfRange.into());
                }
                total_in = total_in.checked_add(value).ok_or(InputValuesOutOfRange)?;
                if total_in > MAX_MONEY {
                    return Err(InputValuesOutOfRange.into());
                }
            }

            let value_out = tx.output_value();
            if total_in < value_out {
                return Err(InBelowOut.into());
            }

            let fee = total_in - value_out;
            if fee > MAX_MONEY {
                return Err(FeeOutOfRange.into());
            }

            reward = reward.checked_add(fee).ok_or(AccumulatedFeeOutOfRange)?;
            if reward > MAX_MONEY {
                return Err(AccumulatedFeeOutOfRange.into());
            }
        }

        let coinbase = block.txdata.first().ok_or(NoCoinbase)?;
        let claimed = coinbase.output_value();
        let allowed = reward + get_block_subsidy(height, ctx.network);

        if claimed > allowed {
            return Err(BadCoinbaseAmount.into());
        }

        Ok(())
    }
}
