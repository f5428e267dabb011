pub mod consensus;
mod network;
mod version_bits;

pub use consensus::{
    get_block_subsidy, LockFlags, ScriptFlags, StakeFlags, BASE_REWARD, COIN, MAX_MONEY,
};
pub use network::{CacheOptions, ChainVariant, NetworkParams};
pub use version_bits::{
    threshold_state, Deployment, DeploymentFlags, StartTime, ThresholdEntry, ThresholdState,
    Timeout, VersionBitsCache, VERSIONBITS_NUM_BITS, VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_MASK,
};
