use bitcoin::BlockHash;
use std::time::Duration;
use thiserror::Error;

/// A consensus rule violation. Each variant maps to a stable rejection
/// code so embedders can match on `code()` without parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("block version {version} is obsolete at height {height}")]
    ObsoleteVersion { version: i32, height: u32 },
    #[error("first transaction is not a coinbase")]
    NoCoinbase,
    #[error("more than one coinbase transaction")]
    MultipleCoinbase,
    #[error("block weight above limit")]
    BadBlockWeight,
    #[error("merkle root does not commit to the transactions")]
    BadMerkleRoot,
    #[error("no inputs")]
    InputsEmpty,
    #[error("no outputs")]
    OutputsEmpty,
    #[error("transaction size too large")]
    Oversized,
    #[error("output value too large")]
    OutputTooLarge,
    #[error("output total value too large")]
    OutputTotalTooLarge,
    #[error("duplicate input")]
    DuplicateInput,
    #[error("bad coinbase script length")]
    BadCoinbaseLength,
    #[error("null previous output")]
    NullPreviousOutput,
    #[error("non final transaction")]
    NonFinal,
    #[error("input missing or spent")]
    InputsMissingOrSpent,
    #[error("transaction overwrites an unspent transaction with the same id")]
    OverwriteUnspent,
    #[error("input from coinbase spent before maturity")]
    PrematureCoinbaseSpend,
    #[error("input value out of range")]
    InputValuesOutOfRange,
    #[error("input value less than output value")]
    InBelowOut,
    #[error("fee out of range")]
    FeeOutOfRange,
    #[error("accumulated fees out of range")]
    AccumulatedFeeOutOfRange,
    #[error("coinbase claims more than subsidy plus fees")]
    BadCoinbaseAmount,
}

impl ConsensusError {
    pub fn code(&self) -> &'static str {
        match self {
            ConsensusError::ObsoleteVersion { .. } => "bad-version",
            ConsensusError::NoCoinbase => "bad-cb-missing",
            ConsensusError::MultipleCoinbase => "bad-cb-multiple",
            ConsensusError::BadBlockWeight => "bad-blk-weight",
            ConsensusError::BadMerkleRoot => "bad-txnmrklroot",
            ConsensusError::InputsEmpty => "bad-txns-vin-empty",
            ConsensusError::OutputsEmpty => "bad-txns-vout-empty",
            ConsensusError::Oversized => "bad-txns-oversize",
            ConsensusError::OutputTooLarge => "bad-txns-vout-toolarge",
            ConsensusError::OutputTotalTooLarge => "bad-txns-txouttotal-toolarge",
            ConsensusError::DuplicateInput => "bad-txns-inputs-duplicate",
            ConsensusError::BadCoinbaseLength => "bad-cb-length",
            ConsensusError::NullPreviousOutput => "bad-txns-prevout-null",
            ConsensusError::NonFinal => "bad-txns-nonfinal",
            ConsensusError::InputsMissingOrSpent => "bad-txns-inputs-missingorspent",
            ConsensusError::OverwriteUnspent => "bad-txns-BIP30",
            ConsensusError::PrematureCoinbaseSpend => "bad-txns-premature-spend-of-coinbase",
            ConsensusError::InputValuesOutOfRange => "bad-txns-inputvalues-outofrange",
            ConsensusError::InBelowOut => "bad-txns-in-belowout",
            ConsensusError::FeeOutOfRange => "bad-txns-fee-outofrange",
            ConsensusError::AccumulatedFeeOutOfRange => "bad-txns-accumulated-fee-outofrange",
            ConsensusError::BadCoinbaseAmount => "bad-cb-amount",
        }
    }
}

/// Errors surfaced by coin view backends and the write-back cache.
#[derive(Error, Debug)]
pub enum CoinViewError {
    /// The writer observed a different tip than the caller expected. The
    /// store is left untouched when this is returned.
    #[error("stale coin view: expected tip {expected}, store at {found}")]
    TipMismatch {
        expected: BlockHash,
        found: BlockHash,
    },
    /// No undo data remains and the store already sits at genesis.
    #[error("undo log exhausted")]
    RewindExhausted,
    /// The backend does not implement the requested operation.
    #[error("operation not supported by this coin view")]
    NotSupported,
    #[error(transparent)]
    Database(#[from] DBError),
}

/// Errors raised while assembling the rule registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("rule {rule:?} depends on {missing:?} which is not registered")]
    MissingDependency {
        rule: crate::rules::RuleId,
        missing: crate::rules::RuleId,
    },
    #[error("rule {0:?} is already registered")]
    DuplicateRule(crate::rules::RuleId),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Violation(#[from] ConsensusError),
    #[error(transparent)]
    View(#[from] CoinViewError),
    #[error("unknown previous block {0}")]
    UnknownPrevious(BlockHash),
    #[error("header chain is incomplete near {0}")]
    IncompleteChain(BlockHash),
    #[error("coin flush did not complete within {0:?}")]
    FlushTimeout(Duration),
    #[error("validation interrupted")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum DBError {
    #[error(transparent)]
    RocksDBError(#[from] rocksdb::Error),
    #[error(transparent)]
    EncodeError(#[from] bitcoin::consensus::encode::Error),
    #[error("{0}")]
    Other(&'static str),
}
