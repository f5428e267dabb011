//! Consensus validation engine and coin (UTXO) store

/// Header chain access
pub mod chain;
/// Coin records, undo data and their serialization
pub mod coins;
/// Key value storage
pub mod db;
/// Block validation driver
pub mod engine;
/// Error types
pub mod error;
/// Extensions to rust-bitcoin primitives
pub mod primitives;
/// Network parameters and deployment state machine
pub mod protocol;
/// The consensus rule chain
pub mod rules;
/// Coin views: disk backend, in-memory test double and write back cache
pub mod view;

pub use chain::{ChainEntry, HeaderChain, HeaderIndex};
pub use coins::{BlockStake, Coins, RewindData, UnspentCoins};
pub use engine::{ConsensusEngine, EngineOptions, Interrupt};
pub use error::{ConsensusError, CoinViewError, EngineError, RegistryError};
pub use view::{CachedCoinView, CoinChanges, CoinView, MemoryCoinView, StoreCoinView};
