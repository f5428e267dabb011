use super::{LockFlags, NetworkParams, ScriptFlags};
use crate::chain::{ChainEntry, HeaderChain};
use bitcoin::BlockHash;
use std::collections::HashMap;

pub const VERSIONBITS_TOP_BITS: i32 = 0x2000_0000;
pub const VERSIONBITS_TOP_MASK: i32 = 0xE000_0000_u32 as i32;

pub const VERSIONBITS_NUM_BITS: usize = 29;

// A finite-state-machine to deploy a softfork in multiple stages.
// State transitions happen at retarget period boundaries if conditions are met.
// Without a transition, state is inherited between periods. All blocks of a
// period share the same state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ThresholdState {
    // First state that each softfork starts out as. The genesis block is by definition in this state for each deployment.
    Defined,
    // For blocks past the starttime.
    Started,
    // For one retarget period after the first retarget period with STARTED blocks of which at least threshold have the associated bit set in nVersion.
    LockedIn,
    // For all blocks after the LOCKED_IN retarget period (final state)
    Active,
    // For all blocks once the first retarget period after the timeout time is hit, if LOCKED_IN wasn't already reached (final state)
    Failed,
}

impl ThresholdState {
    pub fn is_active(&self) -> bool {
        *self == ThresholdState::Active
    }

    pub fn is_defined(&self) -> bool {
        *self == ThresholdState::Defined
    }

    pub fn is_started(&self) -> bool {
        *self == ThresholdState::Started
    }

    pub fn is_locked_in(&self) -> bool {
        *self == ThresholdState::LockedIn
    }

    pub fn is_failed(&self) -> bool {
        *self == ThresholdState::Failed
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Deployment {
    pub name: &'static str,
    pub bit: u8,
    pub start_time: StartTime,
    pub timeout: Timeout,
}

#[derive(Debug, Clone, Copy)]
pub enum StartTime {
    AlwaysActive,
    StartTime(u32),
}

#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    NoTimeout,
    Timeout(u32),
}

impl Deployment {
    pub fn new(name: &'static str, bit: u8, start_time: StartTime, timeout: Timeout) -> Self {
        Self {
            name,
            bit,
            start_time,
            timeout,
        }
    }

    pub fn always_active(name: &'static str, bit: u8) -> Self {
        Self {
            name,
            bit,
            start_time: StartTime::AlwaysActive,
            timeout: Timeout::NoTimeout,
        }
    }
}

/// The rules in force for one block, resolved from fixed activation heights
/// and the deployment states at its parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentFlags {
    pub script: ScriptFlags,
    pub lock: LockFlags,
    pub bip30: bool,
    pub bip34: bool,
}

/// The resolved state of one deployment for one retarget period, keyed in the
/// cache by the final block of the previous period.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ThresholdEntry {
    pub state: ThresholdState,
    /// Signalling blocks counted in the examined window. Only meaningful for
    /// transitions evaluated out of Started.
    pub votes: u32,
    /// Median time past of the period boundary this entry was computed at.
    pub median_time: u32,
}

/// Append only cache of period boundary states, one map per deployment.
/// Entries are a pure function of the header chain so they are never
/// invalidated, only added.
#[derive(Default, Debug)]
pub struct VersionBitsCache {
    states: HashMap<&'static str, HashMap<BlockHash, ThresholdEntry>>,
}

impl VersionBitsCache {
    pub fn new(network: &NetworkParams) -> VersionBitsCache {
        let mut cache = VersionBitsCache::default();
        let mut bits_seen = Vec::new();
        for (name, deployment) in network.deployments.iter() {
            assert!(!bits_seen.contains(&deployment.bit));
            bits_seen.push(deployment.bit);
            cache.states.insert(*name, HashMap::new());
        }
        cache
    }

    pub fn get(&self, name: &'static str, hash: &BlockHash) -> Option<ThresholdEntry> {
        self.states.get(name)?.get(hash).copied()
    }

    pub fn set(&mut self, name: &'static str, hash: BlockHash, entry: ThresholdEntry) {
        self.states.entry(name).or_default().insert(hash, entry);
    }

    pub fn len(&self, name: &'static str) -> usize {
        self.states.get(name).map(|m| m.len()).unwrap_or(0)
    }
}

/// Compute the deployment state that applies to the block after `prev`.
///
/// Walks back through period boundaries until a cached entry (or the chain
/// start) is found, then rolls the state machine forward, caching every
/// boundary on the way. Returns `None` when the header chain is missing
/// entries needed for the walk.
pub fn threshold_state(
    chain: &dyn HeaderChain,
    cache: &mut VersionBitsCache,
    params: &NetworkParams,
    prev: &ChainEntry,
    deployment: &Deployment,
) -> Option<ThresholdEntry> {
    let start = match deployment.start_time {
        StartTime::AlwaysActive => {
            return Some(ThresholdEntry {
                state: ThresholdState::Active,
                votes: 0,
                median_time: 0,
            });
        }
        StartTime::StartTime(start) => start,
    };

    let period = params.miner_confirmation_window;
    let threshold = params.rule_change_activation_threshold;

    // Walk prev back to the last block of its period, the point state
    // transitions are evaluated at.
    let mut boundary = {
        let offset = (prev.height + 1) % period;
        if offset > prev.height {
            None
        } else {
            Some(chain.ancestor(prev, prev.height - offset)?)
        }
    };

    // Walk back one period at a time until we hit a cached boundary or run
    // out of chain.
    let mut to_compute = Vec::new();
    let mut entry = loop {
        match boundary {
            None => {
                break ThresholdEntry {
                    state: ThresholdState::Defined,
                    votes: 0,
                    median_time: 0,
                };
            }
            Some(b) => {
                if let Some(cached) = cache.get(deployment.name, &b.hash) {
                    break cached;
                }
                let median_time = chain.median_time_past(&b);
                if median_time < start {
                    // The deployment cannot have started at or before this
                    // boundary, so its state here is settled.
                    let entry = ThresholdEntry {
                        state: ThresholdState::Defined,
                        votes: 0,
                        median_time,
                    };
                    cache.set(deployment.name, b.hash, entry);
                    break entry;
                }
                to_compute.push(b);
                boundary = if b.height >= period {
                    Some(chain.ancestor(&b, b.height - period)?)
                } else {
                    None
                };
            }
        }
    };

    // Roll forward, earliest boundary first.
    while let Some(b) = to_compute.pop() {
        let median_time = chain.median_time_past(&b);
        let mut votes = 0;

        let state = match entry.state {
            ThresholdState::Defined => {
                if timed_out(deployment.timeout, median_time) {
                    ThresholdState::Failed
                } else if median_time >= start {
                    ThresholdState::Started
                } else {
                    ThresholdState::Defined
                }
            }
            ThresholdState::Started => {
                if timed_out(deployment.timeout, median_time) {
                    ThresholdState::Failed
                } else {
                    // Count signalling blocks over the period ending at this
                    // boundary, inclusive.
                    let mut cursor = Some(b);
                    for _ in 0..period {
                        let c = cursor?;
                        if c.has_bit(deployment.bit) {
                            votes += 1;
                        }
                        cursor = if c.height == 0 {
                            None
                        } else {
                            chain.entry(&c.prev_block)
                        };
                    }
                    if votes >= threshold {
                        ThresholdState::LockedIn
                    } else {
                        ThresholdState::Started
                    }
                }
            }
            ThresholdState::LockedIn => ThresholdState::Active,
            ThresholdState::Active => ThresholdState::Active,
            ThresholdState::Failed => ThresholdState::Failed,
        };

        entry = ThresholdEntry {
            state,
            votes,
            median_time,
        };
        cache.set(deployment.name, b.hash, entry);
    }

    Some(entry)
}

fn timed_out(timeout: Timeout, median_time: u32) -> bool {
    match timeout {
        Timeout::NoTimeout => false,
        Timeout::Timeout(timeout) => median_time >= timeout,
    }
}
