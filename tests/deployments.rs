mod common;

use bitcoin::{hashes::Hash, BlockHash, TxMerkleNode};
use chainstate::{
    chain::{ChainEntry, HeaderIndex},
    protocol::{
        threshold_state, Deployment, NetworkParams, StartTime, ThresholdState, Timeout,
        VersionBitsCache, VERSIONBITS_TOP_BITS,
    },
};
use maplit::hashmap;

fn hash_of(n: u32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_le_bytes());
    bytes[31] = 0xfe;
    BlockHash::from_byte_array(bytes)
}

/// A header chain with ten minute spacing, optionally signalling one bit
/// in every block
fn build_chain(params: &NetworkParams, len: u32, signal_bit: Option<u8>) -> HeaderIndex {
    let mut index = HeaderIndex::new(params);
    let mut prev = index.tip();
    for height in 1..=len {
        let version = match signal_bit {
            Some(bit) => VERSIONBITS_TOP_BITS | (1 << bit),
            None => 4,
        };
        let entry = ChainEntry {
            hash: hash_of(height),
            version,
            prev_block: prev.hash,
            merkle_root: TxMerkleNode::all_zeros(),
            time: prev.time + 600,
            bits: prev.bits,
            nonce: 0,
            height,
        };
        index.insert(entry);
        prev = entry;
    }
    index
}

/// The state applying to the block at `height`
fn state_at(
    index: &HeaderIndex,
    cache: &mut VersionBitsCache,
    params: &NetworkParams,
    deployment: &Deployment,
    height: u32,
) -> ThresholdState {
    if height == 0 {
        // genesis is Defined for every deployment
        return ThresholdState::Defined;
    }
    let prev = index.entry_by_height(height - 1).unwrap();
    threshold_state(index, cache, params, &prev, deployment)
        .unwrap()
        .state
}

fn testdummy(params: &NetworkParams) -> Deployment {
    *params.deployments.get("testdummy").unwrap()
}

#[test]
fn full_signalling_walks_to_active() {
    common::init_logger();
    let params = common::regtest();
    let deployment = testdummy(&params);
    let index = build_chain(&params, 600, Some(deployment.bit));
    let mut cache = VersionBitsCache::new(&params);

    let expected = hashmap! {
        0 => ThresholdState::Defined,
        1 => ThresholdState::Defined,
        143 => ThresholdState::Defined,
        144 => ThresholdState::Started,
        287 => ThresholdState::Started,
        288 => ThresholdState::LockedIn,
        431 => ThresholdState::LockedIn,
        432 => ThresholdState::Active,
        600 => ThresholdState::Active,
    };
    for (height, state) in expected {
        assert_eq!(
            state_at(&index, &mut cache, &params, &deployment, height),
            state,
            "height {}",
            height
        );
    }
}

#[test]
fn no_signalling_stays_started() {
    common::init_logger();
    let params = common::regtest();
    let deployment = testdummy(&params);
    let index = build_chain(&params, 600, None);
    let mut cache = VersionBitsCache::new(&params);

    let expected = hashmap! {
        0 => ThresholdState::Defined,
        144 => ThresholdState::Started,
        288 => ThresholdState::Started,
        432 => ThresholdState::Started,
        600 => ThresholdState::Started,
    };
    for (height, state) in expected {
        assert_eq!(
            state_at(&index, &mut cache, &params, &deployment, height),
            state,
            "height {}",
            height
        );
    }
}

#[test]
fn timeout_fails_the_deployment() {
    common::init_logger();
    let mut params = common::regtest();
    let genesis_time = HeaderIndex::new(&params).tip().time;

    // median time past crosses this at the second period boundary
    let timeout = genesis_time + 600 * 282;
    let deployment = Deployment::new(
        "testdummy",
        28,
        StartTime::StartTime(0),
        Timeout::Timeout(timeout),
    );
    params.deployments.insert("testdummy", deployment);

    let expected = hashmap! {
        143 => ThresholdState::Defined,
        144 => ThresholdState::Started,
        287 => ThresholdState::Started,
        288 => ThresholdState::Failed,
        432 => ThresholdState::Failed,
    };

    let index = build_chain(&params, 450, None);
    let mut cache = VersionBitsCache::new(&params);
    for (height, state) in expected.clone() {
        assert_eq!(
            state_at(&index, &mut cache, &params, &deployment, height),
            state,
            "height {}",
            height
        );
    }

    // the timeout wins even with every block signalling
    let index = build_chain(&params, 450, Some(deployment.bit));
    let mut cache = VersionBitsCache::new(&params);
    for (height, state) in expected {
        assert_eq!(
            state_at(&index, &mut cache, &params, &deployment, height),
            state,
            "height {}",
            height
        );
    }
}

#[test]
fn lock_in_records_votes_and_median_time() {
    common::init_logger();
    let params = common::regtest();
    let deployment = testdummy(&params);
    let index = build_chain(&params, 300, Some(deployment.bit));
    let mut cache = VersionBitsCache::new(&params);

    let genesis_time = index.entry_by_height(0).unwrap().time;
    let boundary = index.entry_by_height(287).unwrap();
    let entry = threshold_state(&index, &mut cache, &params, &boundary, &deployment).unwrap();

    assert!(entry.state.is_locked_in());
    assert_eq!(entry.votes, params.miner_confirmation_window);
    assert_eq!(entry.median_time, genesis_time + 600 * 282);
}

#[test]
fn always_active_deployments_short_circuit() {
    common::init_logger();
    let params = common::regtest();
    let csv = *params.deployments.get("csv").unwrap();
    let index = build_chain(&params, 5, None);
    let mut cache = VersionBitsCache::new(&params);

    let prev = index.entry_by_height(3).unwrap();
    let entry = threshold_state(&index, &mut cache, &params, &prev, &csv).unwrap();

    assert!(entry.state.is_active());
    assert_eq!(cache.len("csv"), 0);
}

#[test]
fn cache_grows_append_only() {
    common::init_logger();
    let params = common::regtest();
    let deployment = testdummy(&params);
    let index = build_chain(&params, 600, Some(deployment.bit));
    let mut cache = VersionBitsCache::new(&params);

    // nothing reaches back to a period boundary yet
    state_at(&index, &mut cache, &params, &deployment, 10);
    assert_eq!(cache.len("testdummy"), 0);

    // walking the whole chain caches one entry per boundary
    state_at(&index, &mut cache, &params, &deployment, 600);
    assert_eq!(cache.len("testdummy"), 4);

    let boundary = index.entry_by_height(143).unwrap().hash;
    let before = cache.get("testdummy", &boundary).unwrap();
    assert!(before.state.is_started());

    // later lookups reuse entries instead of recomputing them
    state_at(&index, &mut cache, &params, &deployment, 300);
    assert_eq!(cache.len("testdummy"), 4);
    assert_eq!(cache.get("testdummy", &boundary), Some(before));
}
