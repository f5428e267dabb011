use crate::error::ConsensusError;
use crate::protocol::consensus::{
    LOCKTIME_THRESHOLD, MAX_BLOCK_WEIGHT, MAX_MONEY, WITNESS_SCALE_FACTOR,
};
use bitcoin::{Sequence, Transaction};
use std::collections::HashSet;

pub trait TransactionExt {
    fn output_value(&self) -> u64;
    fn is_final_at(&self, height: u32, time: u32) -> bool;
    fn check_sanity(&self) -> Result<(), ConsensusError>;
}

impl TransactionExt for Transaction {
    // Does not check overflows, must be done separately
    fn output_value(&self) -> u64 {
        self.output
            .iter()
            .fold(0, |total, output| total + output.value.to_sat())
    }

    fn is_final_at(&self, height: u32, time: u32) -> bool {
        let lock_time = self.lock_time.to_consensus_u32();

        if lock_time == 0 {
            return true;
        }

        let cutoff = if lock_time < LOCKTIME_THRESHOLD {
            height
        } else {
            time
        };

        if lock_time < cutoff {
            return true;
        }

        // a lock time in the future still counts as final if every input
        // has opted out
        self.input
            .iter()
            .all(|input| input.sequence == Sequence::MAX)
    }

    fn check_sanity(&self) -> Result<(), ConsensusError> {
        use ConsensusError::*;

        if self.input.is_empty() {
            return Err(InputsEmpty);
        }

        if self.output.is_empty() {
            return Err(OutputsEmpty);
        }

        if self.base_size() * WITNESS_SCALE_FACTOR > MAX_BLOCK_WEIGHT as usize {
            return Err(Oversized);
        }

        let mut value_out: u64 = 0;
        for output in &self.output {
            if output.value.to_sat() > MAX_MONEY {
                return Err(OutputTooLarge);
            }
            value_out = value_out
                .checked_add(output.value.to_sat())
                .ok_or(OutputTotalTooLarge)?;
            if value_out > MAX_MONEY {
                return Err(OutputTotalTooLarge);
            }
        }

        // can only be duplicate inputs if more than 1
        if self.input.len() > 1 {
            let mut outpoints = HashSet::with_capacity(self.input.len());
            for input in &self.input {
                let duplicate = !outpoints.insert(&input.previous_output);
                if duplicate {
                    return Err(DuplicateInput);
                }
            }
        }

        if self.is_coinbase() {
            let script_sig_len = self.input[0].script_sig.len();
            if script_sig_len < 2 || script_sig_len > 100 {
                return Err(BadCoinbaseLength);
            }
        } else {
            for input in &self.input {
                if input.previous_output.is_null() {
                    return Err(NullPreviousOutput);
                }
            }
        }

        Ok(())
    }
}
