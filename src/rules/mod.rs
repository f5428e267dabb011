mod activation;
mod connect;
mod finality;
mod inputs;
mod sanity;

pub use activation::{DeploymentActivation, HeaderVersion};
pub use connect::ConnectCoins;
pub use finality::TransactionFinality;
pub use inputs::{CheckInputs, FetchCoins};
pub use sanity::{BlockSanity, MerkleRoot};

use crate::{
    chain::{ChainEntry, HeaderChain},
    coins::UnspentOutputSet,
    engine::Interrupt,
    error::{ConsensusError, EngineError, RegistryError},
    protocol::{DeploymentFlags, NetworkParams, VersionBitsCache},
    view::CoinView,
};
use bitcoin::{Block, Txid};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    DeploymentActivation,
    HeaderVersion,
    BlockSanity,
    MerkleRoot,
    TransactionFinality,
    FetchCoins,
    CheckInputs,
    ConnectCoins,
}

/// One step of block validation. Rules run in registration order against a
/// shared context and may leave results there for rules behind them.
pub trait ConsensusRule: Send + Sync {
    fn id(&self) -> RuleId;
    fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError>;
}

struct RuleDescriptor {
    rule: Box<dyn ConsensusRule>,
    depends_on: Vec<RuleId>,
    /// Pure validation rules a check-only pass may omit, plus the final
    /// connect step which must never run without commitment intent
    can_skip: bool,
}

/// Shared state for one validation pass over one block.
pub struct BlockContext<'a> {
    pub block: &'a Block,
    pub entry: ChainEntry,
    pub prev: ChainEntry,
    /// Txid per transaction, computed once up front
    pub txids: Vec<Txid>,
    pub network: &'a NetworkParams,
    pub chain: &'a dyn HeaderChain,
    pub view: &'a dyn CoinView,
    pub version_bits: &'a RwLock<VersionBitsCache>,
    pub interrupt: &'a Interrupt,
    /// Validate without touching the coin view
    pub check_only: bool,
    /// Filled in by the activation rule
    pub flags: DeploymentFlags,
    /// Coin records the block works against, filled in by the fetch rule
    pub set: UnspentOutputSet,
    /// Transactions created earlier in this same block, by index
    pub in_block: HashMap<Txid, usize>,
    /// First violation hit, if any
    pub error: Option<ConsensusError>,
}

impl<'a> BlockContext<'a> {
    pub fn new(
        block: &'a Block,
        entry: ChainEntry,
        prev: ChainEntry,
        network: &'a NetworkParams,
        chain: &'a dyn HeaderChain,
        view: &'a dyn CoinView,
        version_bits: &'a RwLock<VersionBitsCache>,
        interrupt: &'a Interrupt,
        check_only: bool,
    ) -> Self {
        let txids = block.txdata.iter().map(|tx| tx.compute_txid()).collect();
        Self {
            block,
            entry,
            prev,
            txids,
            network,
            chain,
            view,
            version_bits,
            interrupt,
            check_only,
            flags: DeploymentFlags::default(),
            set: UnspentOutputSet::default(),
            in_block: HashMap::new(),
            error: None,
        }
    }

    pub fn height(&self) -> u32 {
        self.entry.height
    }
}

/// Ordered rule registry. Dependencies are enforced when rules are added, so
/// execution is a plain in-order walk.
pub struct ConsensusRules {
    rules: Vec<RuleDescriptor>,
    registered: HashSet<RuleId>,
}

impl ConsensusRules {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            registered: HashSet::new(),
        }
    }

    /// The full rule chain in its canonical order
    pub fn standard() -> Result<Self, RegistryError> {
        use RuleId::*;

        let mut rules = Self::new();
        rules.register(Box::new(DeploymentActivation), &[], false)?;
        rules.register(Box::new(HeaderVersion), &[DeploymentActivation], false)?;
        rules.register(Box::new(BlockSanity), &[], true)?;
        rules.register(Box::new(MerkleRoot), &[BlockSanity], true)?;
        rules.register(Box::new(TransactionFinality), &[DeploymentActivation], true)?;
        rules.register(Box::new(FetchCoins), &[DeploymentActivation], false)?;
        rules.register(Box::new(CheckInputs), &[FetchCoins], false)?;
        rules.register(Box::new(ConnectCoins), &[CheckInputs], true)?;
        Ok(rules)
    }

    pub fn register(
        &mut self,
        rule: Box<dyn ConsensusRule>,
        depends_on: &[RuleId],
        can_skip: bool,
    ) -> Result<(), RegistryError> {
        let id = rule.id();

        if self.registered.contains(&id) {
            return Err(RegistryError::DuplicateRule(id));
        }
        for missing in depends_on {
            if !self.registered.contains(missing) {
                return Err(RegistryError::MissingDependency {
                    rule: id,
                    missing: *missing,
                });
            }
        }

        self.registered.insert(id);
        self.rules.push(RuleDescriptor {
            rule,
            depends_on: depends_on.to_vec(),
            can_skip,
        });

        Ok(())
    }

    pub fn depends_on(&self, id: RuleId) -> Option<&[RuleId]> {
        self.rules
            .iter()
            .find(|d| d.rule.id() == id)
            .map(|d| d.depends_on.as_slice())
    }

    /// Run every applicable rule in order, stopping at the first failure.
    pub fn execute(&self, ctx: &mut BlockContext<'_>) -> Result<(), EngineError> {
        for descriptor in &self.rules {
            ctx.interrupt.check()?;

            if ctx.check_only && descriptor.can_skip {
                continue;
            }

            if let Err(err) = descriptor.rule.execute(ctx) {
                if let EngineError::Violation(violation) = &err {
                    ctx.error = Some(violation.clone());
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
