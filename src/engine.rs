use crate::{
    chain::{ChainEntry, HeaderChain},
    error::{CoinViewError, DBError, EngineError, RegistryError},
    protocol::{NetworkParams, VersionBitsCache},
    rules::{BlockContext, ConsensusRules},
    view::{CachedCoinView, CoinView},
};
use bitcoin::{Block, BlockHash};
use log::{info, warn};
use parking_lot::RwLock;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Hard ceiling on how long a flush may run before it is abandoned
    pub flush_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            flush_timeout: Duration::from_secs(30),
        }
    }
}

/// Cooperative cancellation handle, checked between rules so an interrupted
/// pass never leaves a half applied block.
#[derive(Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), EngineError> {
        if self.is_interrupted() {
            Err(EngineError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Drives the rule chain over candidate blocks and owns the single mutable
/// tip. Headers come from outside through [`HeaderChain`], coin state goes
/// through the write back cache.
pub struct ConsensusEngine {
    chain: Arc<dyn HeaderChain>,
    view: Arc<CachedCoinView>,
    network: NetworkParams,
    rules: ConsensusRules,
    version_bits: RwLock<VersionBitsCache>,
    /// Serializes validation passes, one candidate block at a time
    validation_lock: tokio::sync::Mutex<()>,
    interrupt: Interrupt,
    options: EngineOptions,
}

impl ConsensusEngine {
    pub fn new(
        chain: Arc<dyn HeaderChain>,
        view: Arc<CachedCoinView>,
        network: NetworkParams,
        options: EngineOptions,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            version_bits: RwLock::new(VersionBitsCache::new(&network)),
            rules: ConsensusRules::standard()?,
            chain,
            view,
            network,
            validation_lock: tokio::sync::Mutex::new(()),
            interrupt: Interrupt::new(),
            options,
        })
    }

    /// Validate and connect, leaving the view tip at this block on success
    pub async fn accept(&self, block: &Block) -> Result<(), EngineError> {
        self.process(block, false).await
    }

    /// Validate without touching the coin view
    pub async fn check_only(&self, block: &Block) -> Result<(), EngineError> {
        self.process(block, true).await
    }

    async fn process(&self, block: &Block, check_only: bool) -> Result<(), EngineError> {
        let _pass = self.validation_lock.lock().await;
        self.interrupt.check()?;

        let prev = self
            .chain
            .entry(&block.header.prev_blockhash)
            .ok_or(EngineError::UnknownPrevious(block.header.prev_blockhash))?;
        let entry = ChainEntry::from_block(block, Some(&prev));

        let result = tokio::task::block_in_place(|| {
            let mut ctx = BlockContext::new(
                block,
                entry,
                prev,
                &self.network,
                self.chain.as_ref(),
                self.view.as_ref(),
                &self.version_bits,
                &self.interrupt,
                check_only,
            );
            self.rules.execute(&mut ctx)
        });

        match &result {
            Ok(()) => {
                if !check_only {
                    info!("connected block {} at height {}", entry.hash, entry.height);
                }
            }
            Err(EngineError::Violation(violation)) => {
                warn!(
                    "rejected block {} at height {}: {} ({})",
                    entry.hash,
                    entry.height,
                    violation.code(),
                    violation
                );
            }
            Err(_) => {}
        }

        result
    }

    /// Flush the write back cache, bounded by the configured hard timeout.
    pub async fn flush(&self, force: bool) -> Result<(), EngineError> {
        let view = Arc::clone(&self.view);
        let worker = tokio::task::spawn_blocking(move || view.flush(force));

        match tokio::time::timeout(self.options.flush_timeout, worker).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(CoinViewError::from(DBError::Other("flush worker failed")).into()),
            Err(_) => Err(EngineError::FlushTimeout(self.options.flush_timeout)),
        }
    }

    /// Unwind the view one block at a time until its tip is `target`.
    /// Fails with `RewindExhausted` when the target is not behind the
    /// current tip.
    pub async fn rewind_to(&self, target: BlockHash) -> Result<(), EngineError> {
        let _pass = self.validation_lock.lock().await;

        // dirty cache state must not outlive the tip it was built on
        self.flush(true).await?;

        loop {
            self.interrupt.check()?;

            let tip = self.view.tip()?;
            if tip == target {
                info!("rewound coin view to {}", target);
                return Ok(());
            }

            tokio::task::block_in_place(|| self.view.rewind())?;
        }
    }

    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn view(&self) -> &CachedCoinView {
        &self.view
    }

    pub fn network(&self) -> &NetworkParams {
        &self.network
    }
}
