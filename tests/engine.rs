mod common;

use bitcoin::{hashes::Hash, Block, BlockHash, OutPoint, TxMerkleNode, Txid};
use chainstate::{
    chain::{ChainEntry, HeaderChain, HeaderIndex},
    coins::BlockStake,
    engine::{ConsensusEngine, EngineOptions},
    error::{ConsensusError, CoinViewError, EngineError},
    protocol::{get_block_subsidy, CacheOptions, ChainVariant, NetworkParams, COIN},
    view::{CachedCoinView, CoinChanges, CoinView, FetchCoinsResponse, MemoryCoinView, StoreCoinView},
};
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

struct Harness {
    network: NetworkParams,
    index: Arc<RwLock<HeaderIndex>>,
    view: Arc<CachedCoinView>,
    backend: Arc<StoreCoinView>,
    engine: ConsensusEngine,
    _tmp: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_params(common::regtest(), EngineOptions::default())
    }

    fn with_params(network: NetworkParams, options: EngineOptions) -> Self {
        common::init_logger();
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(StoreCoinView::open(tmp.path().into(), &network).unwrap());
        let view = Arc::new(
            CachedCoinView::new(
                backend.clone(),
                CacheOptions {
                    flush_threshold_bytes: usize::MAX,
                    flush_interval: Duration::from_secs(3600),
                    max_records: 100_000,
                },
            )
            .unwrap(),
        );
        let index = Arc::new(RwLock::new(HeaderIndex::new(&network)));
        let engine =
            ConsensusEngine::new(index.clone(), view.clone(), network.clone(), options).unwrap();

        Harness {
            network,
            index,
            view,
            backend,
            engine,
            _tmp: tmp,
        }
    }

    fn tip_entry(&self) -> ChainEntry {
        self.index.read().tip()
    }

    async fn accept(&self, block: &Block) -> Result<(), EngineError> {
        let result = self.engine.accept(block).await;
        if result.is_ok() {
            let prev = self.index.entry(&block.header.prev_blockhash).unwrap();
            self.index
                .write()
                .insert(ChainEntry::from_block(block, Some(&prev)));
        }
        result
    }

    /// Mine one block carrying only a coinbase for the full subsidy
    async fn mine(&self, tag: u8) -> Block {
        let prev = self.tip_entry();
        let height = prev.height + 1;
        let subsidy = get_block_subsidy(height, &self.network);
        let block = common::next_block(&prev, vec![common::coinbase(height, subsidy, tag)]);
        self.accept(&block).await.unwrap();
        block
    }
}

fn assert_violation(err: EngineError, code: &str) {
    match err {
        EngineError::Violation(violation) => assert_eq!(violation.code(), code),
        other => panic!("expected a violation, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_flush_and_rewind() {
    let h = Harness::new();
    let genesis = h.network.genesis_hash;
    assert_eq!(h.view.tip().unwrap(), genesis);

    let b1 = h.mine(1).await;
    let c1 = b1.txdata[0].compute_txid();
    assert_eq!(h.view.tip().unwrap(), b1.block_hash());

    for _ in 2..=100u32 {
        h.mine(0).await;
    }
    assert_eq!(h.tip_entry().height, 100);

    // spend the first coinbase, mature exactly now, paying a one coin fee
    let prev = h.tip_entry();
    let spend = common::spend(OutPoint { txid: c1, vout: 0 }, 49 * COIN, 9);
    let reward = get_block_subsidy(101, &h.network) + COIN;
    let b101 = common::next_block(&prev, vec![common::coinbase(101, reward, 2), spend.clone()]);
    h.accept(&b101).await.unwrap();

    let spend_txid = spend.compute_txid();
    let response = h.view.fetch_coins(&[c1, spend_txid]).unwrap();
    assert!(response.coins[0].is_none());
    let created = response.coins[1].as_ref().unwrap();
    assert_eq!(created.height, 101);
    assert!(!created.coinbase);

    h.engine.flush(true).await.unwrap();
    assert_eq!(h.backend.tip().unwrap(), b101.block_hash());

    // unwind two blocks and watch the spent coinbase come back
    let target = h.index.read().entry_by_height(99).unwrap().hash;
    h.engine.rewind_to(target).await.unwrap();
    assert_eq!(h.view.tip().unwrap(), target);

    let response = h.view.fetch_coins(&[c1, spend_txid]).unwrap();
    let restored = response.coins[0].as_ref().unwrap();
    assert!(restored.coinbase);
    assert_eq!(restored.height, 1);
    assert_eq!(restored.output(0).unwrap().value.to_sat(), 50 * COIN);
    assert!(response.coins[1].is_none());

    h.engine.rewind_to(genesis).await.unwrap();
    assert_eq!(h.view.tip().unwrap(), genesis);
    assert!(h.view.fetch_coins(&[c1]).unwrap().coins[0].is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn violation_leaves_the_view_untouched() {
    let h = Harness::new();
    let genesis = h.engine.network().genesis_hash;

    let prev = h.tip_entry();
    let greedy = common::next_block(&prev, vec![common::coinbase(1, 51 * COIN, 1)]);

    let err = h.accept(&greedy).await.unwrap_err();
    match err {
        EngineError::Violation(violation) => {
            assert_eq!(violation, ConsensusError::BadCoinbaseAmount);
            assert_eq!(violation.code(), "bad-cb-amount");
        }
        other => panic!("expected a violation, got {:?}", other),
    }

    assert_eq!(h.view.tip().unwrap(), genesis);
    let txid = greedy.txdata[0].compute_txid();
    assert!(h.view.fetch_coins(&[txid]).unwrap().coins[0].is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_parent_is_rejected() {
    let h = Harness::new();

    let mut fake = h.tip_entry();
    fake.hash = BlockHash::from_byte_array([0xab; 32]);
    let block = common::next_block(&fake, vec![common::coinbase(1, 50 * COIN, 1)]);

    let err = h.engine.accept(&block).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownPrevious(hash) if hash == fake.hash));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn obsolete_versions_are_rejected() {
    let mut params = common::regtest();
    params.bip34_height = 4;
    let h = Harness::with_params(params, EngineOptions::default());

    for tag in 1..=4u8 {
        h.mine(tag).await;
    }

    let prev = h.tip_entry();
    let block = common::build_block(
        &prev,
        1,
        prev.time + 600,
        vec![common::coinbase(5, 50 * COIN, 9)],
    );
    let err = h.accept(&block).await.unwrap_err();
    match err {
        EngineError::Violation(violation) => {
            assert_eq!(violation.code(), "bad-version");
            assert!(matches!(
                violation,
                ConsensusError::ObsoleteVersion {
                    version: 1,
                    height: 5
                }
            ));
        }
        other => panic!("expected a violation, got {:?}", other),
    }

    // the same block with a current version connects
    let good = common::next_block(&prev, vec![common::coinbase(5, 50 * COIN, 9)]);
    h.accept(&good).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_inputs_are_rejected() {
    let h = Harness::new();
    h.mine(1).await;

    let prev = h.tip_entry();
    let ghost = OutPoint {
        txid: Txid::from_byte_array([0x77; 32]),
        vout: 0,
    };
    let block = common::next_block(
        &prev,
        vec![
            common::coinbase(2, 50 * COIN, 2),
            common::spend(ghost, 10 * COIN, 3),
        ],
    );

    let err = h.accept(&block).await.unwrap_err();
    assert_violation(err, "bad-txns-inputs-missingorspent");
    assert_eq!(h.view.tip().unwrap(), prev.hash);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn double_spends_within_a_block_are_rejected() {
    let h = Harness::new();
    let b1 = h.mine(1).await;
    let c1 = b1.txdata[0].compute_txid();
    for _ in 2..=100u32 {
        h.mine(0).await;
    }

    let prev = h.tip_entry();
    let out = OutPoint { txid: c1, vout: 0 };
    let block = common::next_block(
        &prev,
        vec![
            common::coinbase(101, 50 * COIN, 2),
            common::spend(out, 20 * COIN, 3),
            common::spend(out, 10 * COIN, 4),
        ],
    );

    let err = h.accept(&block).await.unwrap_err();
    assert_violation(err, "bad-txns-inputs-missingorspent");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immature_coinbase_spends_are_rejected() {
    let h = Harness::new();
    let b1 = h.mine(1).await;
    let c1 = b1.txdata[0].compute_txid();

    let prev = h.tip_entry();
    let block = common::next_block(
        &prev,
        vec![
            common::coinbase(2, 50 * COIN, 2),
            common::spend(OutPoint { txid: c1, vout: 0 }, 50 * COIN, 3),
        ],
    );

    let err = h.accept(&block).await.unwrap_err();
    assert_violation(err, "bad-txns-premature-spend-of-coinbase");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forked_parent_does_not_match_the_view_tip() {
    let h = Harness::new();
    h.mine(1).await;

    // a competing block built on genesis while the view sits at height 1
    let genesis_entry = h.index.read().entry_by_height(0).unwrap();
    let fork = common::build_block(
        &genesis_entry,
        4,
        genesis_entry.time + 601,
        vec![common::coinbase(1, 50 * COIN, 9)],
    );

    let err = h.engine.accept(&fork).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::View(CoinViewError::TipMismatch { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn check_only_skips_connection() {
    let h = Harness::new();
    let genesis = h.network.genesis_hash;

    let prev = h.tip_entry();
    let mut block = common::next_block(&prev, vec![common::coinbase(1, 50 * COIN, 1)]);

    h.engine.check_only(&block).await.unwrap();
    assert_eq!(h.view.tip().unwrap(), genesis);

    // the preview only replays the contextual rules, so a broken body
    // commitment slips through it but still fails a real connect
    block.header.merkle_root = TxMerkleNode::all_zeros();
    h.engine.check_only(&block).await.unwrap();
    assert_eq!(h.view.tip().unwrap(), genesis);

    let err = h.engine.accept(&block).await.unwrap_err();
    assert_violation(err, "bad-txnmrklroot");

    let good = common::next_block(&prev, vec![common::coinbase(1, 50 * COIN, 1)]);
    h.accept(&good).await.unwrap();
    assert_eq!(h.view.tip().unwrap(), good.block_hash());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupt_stops_validation() {
    let h = Harness::new();
    let prev = h.tip_entry();
    let block = common::next_block(&prev, vec![common::coinbase(1, 50 * COIN, 1)]);

    let handle = h.engine.interrupt_handle();
    handle.interrupt();
    assert!(handle.is_interrupted());

    let err = h.engine.accept(&block).await.unwrap_err();
    assert!(matches!(err, EngineError::Interrupted));
    assert_eq!(h.view.tip().unwrap(), h.network.genesis_hash);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stake_data_is_persisted_and_rewound() {
    let mut params = common::regtest();
    params.variant = ChainVariant::ProofOfStake;
    let h = Harness::with_params(params, EngineOptions::default());
    let genesis = h.network.genesis_hash;

    let b1 = h.mine(1).await;
    let c1 = b1.txdata[0].compute_txid();

    let stake = h.view.block_stake(&b1.block_hash()).unwrap().unwrap();
    assert!(!stake.is_proof_of_stake());
    assert_eq!(stake.time, b1.header.time);

    let coins = h.view.fetch_coins(&[c1]).unwrap().coins[0].clone().unwrap();
    let trailer = coins.stake.unwrap();
    assert!(!trailer.coinstake);
    assert_eq!(trailer.time, b1.header.time);

    h.engine.rewind_to(genesis).await.unwrap();
    assert_eq!(h.view.block_stake(&b1.block_hash()).unwrap(), None);
    assert!(h.view.fetch_coins(&[c1]).unwrap().coins[0].is_none());
}

/// Forwards to a memory view but holds every save for a while.
struct SlowView {
    inner: MemoryCoinView,
    delay: Duration,
}

impl CoinView for SlowView {
    fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse, CoinViewError> {
        self.inner.fetch_coins(txids)
    }

    fn tip(&self) -> Result<BlockHash, CoinViewError> {
        self.inner.tip()
    }

    fn save_changes(&self, changes: CoinChanges) -> Result<(), CoinViewError> {
        std::thread::sleep(self.delay);
        self.inner.save_changes(changes)
    }

    fn rewind(&self) -> Result<BlockHash, CoinViewError> {
        self.inner.rewind()
    }

    fn block_stake(&self, hash: &BlockHash) -> Result<Option<BlockStake>, CoinViewError> {
        self.inner.block_stake(hash)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_is_bounded_by_the_hard_timeout() {
    common::init_logger();
    let network = common::regtest();

    let backend = Arc::new(SlowView {
        inner: MemoryCoinView::with_network(&network),
        delay: Duration::from_millis(500),
    });
    let view = Arc::new(
        CachedCoinView::new(
            backend,
            CacheOptions {
                flush_threshold_bytes: usize::MAX,
                flush_interval: Duration::from_secs(3600),
                max_records: 100_000,
            },
        )
        .unwrap(),
    );
    let index = Arc::new(RwLock::new(HeaderIndex::new(&network)));
    let engine = ConsensusEngine::new(
        index.clone(),
        view,
        network.clone(),
        EngineOptions {
            flush_timeout: Duration::from_millis(50),
        },
    )
    .unwrap();

    // queue a dirty block so the flush has work to do
    let prev = index.read().tip();
    let block = common::next_block(&prev, vec![common::coinbase(1, 50 * COIN, 1)]);
    engine.accept(&block).await.unwrap();
    assert_eq!(engine.view().tip().unwrap(), block.block_hash());

    let err = engine.flush(true).await.unwrap_err();
    assert!(matches!(err, EngineError::FlushTimeout(_)));
}
