use super::version_bits::{Deployment, StartTime, Timeout};
use bitcoin::{blockdata::constants::genesis_block, BlockHash, Network};
use std::{collections::HashMap, time::Duration};

/// Whether coin records carry the proof of stake trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainVariant {
    ProofOfWork,
    ProofOfStake,
}

impl ChainVariant {
    pub fn has_stake_data(self) -> bool {
        matches!(self, ChainVariant::ProofOfStake)
    }
}

#[derive(Clone)]
pub struct NetworkParams {
    pub network: Network,
    pub variant: ChainVariant,
    pub genesis_hash: BlockHash,
    pub halving_interval: u32,
    pub coinbase_maturity: u32,
    pub p2sh_height: u32,
    pub bip34_height: u32,
    pub bip65_height: u32,
    pub bip66_height: u32,
    pub miner_confirmation_window: u32,
    pub rule_change_activation_threshold: u32,
    pub deployments: HashMap<&'static str, Deployment>,
}

impl Default for NetworkParams {
    fn default() -> Self {
        NetworkParams::from_network(Network::Bitcoin)
    }
}

impl NetworkParams {
    pub fn from_network(network: Network) -> Self {
        let genesis_hash = genesis_block(network).block_hash();
        match network {
            Network::Bitcoin => Self {
                network,
                variant: ChainVariant::ProofOfWork,
                genesis_hash,
                halving_interval: 210_000,
                coinbase_maturity: super::COINBASE_MATURITY,
                p2sh_height: 173_805,
                bip34_height: 227_931,
                bip65_height: 388_381,
                bip66_height: 363_725,
                miner_confirmation_window: 2016,
                rule_change_activation_threshold: 1916,
                deployments: deployments(&[
                    Deployment::new("csv", 0, StartTime::StartTime(1_462_060_800), Timeout::Timeout(1_493_596_800)),
                    Deployment::new("segwit", 1, StartTime::StartTime(1_479_168_000), Timeout::Timeout(1_510_704_000)),
                ]),
            },
            Network::Regtest => Self {
                network,
                variant: ChainVariant::ProofOfWork,
                genesis_hash,
                halving_interval: 150,
                coinbase_maturity: super::COINBASE_MATURITY,
                p2sh_height: 0,
                bip34_height: 500,
                bip65_height: 1351,
                bip66_height: 1251,
                miner_confirmation_window: 144,
                rule_change_activation_threshold: 108,
                deployments: deployments(&[
                    Deployment::always_active("csv", 0),
                    Deployment::always_active("segwit", 1),
                    Deployment::new("testdummy", 28, StartTime::StartTime(0), Timeout::NoTimeout),
                ]),
            },
            _ => Self {
                network,
                variant: ChainVariant::ProofOfWork,
                genesis_hash,
                halving_interval: 210_000,
                coinbase_maturity: super::COINBASE_MATURITY,
                p2sh_height: 0,
                bip34_height: 21_111,
                bip65_height: 581_885,
                bip66_height: 330_776,
                miner_confirmation_window: 2016,
                rule_change_activation_threshold: 1512,
                deployments: deployments(&[
                    Deployment::new("csv", 0, StartTime::StartTime(1_456_790_400), Timeout::Timeout(1_493_596_800)),
                    Deployment::new("segwit", 1, StartTime::StartTime(1_462_060_800), Timeout::Timeout(1_493_596_800)),
                ]),
            },
        }
    }
}

fn deployments(list: &[Deployment]) -> HashMap<&'static str, Deployment> {
    list.iter().map(|d| (d.name, *d)).collect()
}

/// Tuning knobs for the write back coin cache
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Flush once this much dirty record data has accumulated
    pub flush_threshold_bytes: usize,
    /// Flush once this much time has passed since the last flush
    pub flush_interval: Duration,
    /// Drop cached records after a flush once the map grows past this
    pub max_records: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: 32 << 20,
            flush_interval: Duration::from_secs(60),
            max_records: 100_000,
        }
    }
}
