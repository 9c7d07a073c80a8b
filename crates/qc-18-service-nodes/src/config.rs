//! Service node configuration and per-network constants

use serde::Deserialize;
use shared_types::{HardFork, PublicKey};

/// One atomic coin unit count (9 decimal places).
pub const COIN: u64 = 1_000_000_000;

/// Network the node runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Mainnet,
    Testnet,
    Devnet,
    /// Local regression chain with relaxed timing rules
    Fakechain,
}

/// Height at which a hardfork version begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct HardForkActivation {
    pub version: HardFork,
    pub height: u64,
}

impl HardForkActivation {
    pub const fn new(version: HardFork, height: u64) -> Self {
        Self { version, height }
    }
}

/// Service node list configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServiceNodeConfig {
    pub network: NetworkType,
    /// Old quorum states to keep: 0 keeps none, 1 keeps all of them
    pub store_quorum_history: u64,
    /// Accept uptime proofs advertising private addresses
    pub debug_allow_local_ips: bool,
    /// Activation schedule, ascending by height
    pub hard_forks: Vec<HardForkActivation>,
    /// Local service node identity, if this node is one
    pub service_node_key: Option<PublicKey>,
}

impl Default for ServiceNodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet,
            store_quorum_history: 0,
            debug_allow_local_ips: false,
            hard_forks: mainnet_hard_forks(),
            service_node_key: None,
        }
    }
}

fn mainnet_hard_forks() -> Vec<HardForkActivation> {
    vec![
        HardForkActivation::new(HardFork::Hf7, 1),
        HardForkActivation::new(HardFork::Hf8, 64_324),
        HardForkActivation::new(HardFork::Hf9, 101_250),
        HardForkActivation::new(HardFork::Hf10, 161_849),
        HardForkActivation::new(HardFork::Hf11, 234_767),
        HardForkActivation::new(HardFork::Hf12, 321_467),
        HardForkActivation::new(HardFork::Hf13, 385_824),
        HardForkActivation::new(HardFork::Hf14, 442_333),
        HardForkActivation::new(HardFork::Hf15, 496_969),
        HardForkActivation::new(HardFork::Hf16, 641_111),
        HardForkActivation::new(HardFork::Hf17, 770_711),
        HardForkActivation::new(HardFork::Hf18, 785_000),
        HardForkActivation::new(HardFork::Hf19, 1_090_000),
    ]
}

impl ServiceNodeConfig {
    /// Config for `network` with an explicit hardfork schedule.
    pub fn for_network(network: NetworkType, hard_forks: Vec<HardForkActivation>) -> Self {
        Self {
            network,
            hard_forks,
            ..Self::default()
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig::for_network(self.network)
    }

    /// Hardfork in effect at `height`.
    pub fn hard_fork_at(&self, height: u64) -> HardFork {
        self.hard_forks
            .iter()
            .take_while(|activation| activation.height <= height)
            .last()
            .map(|activation| activation.version)
            .unwrap_or(HardFork::Hf7)
    }

    /// First height of `version`, if it is scheduled.
    pub fn activation_height(&self, version: HardFork) -> Option<u64> {
        self.hard_forks
            .iter()
            .find(|activation| activation.version >= version)
            .map(|activation| activation.height)
    }
}

/// Per-network consensus constants
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub network: NetworkType,
    pub staking_requirement: u64,
    pub staking_lock_blocks: u64,
    /// Blocks a node must be active before it appears in the payable list
    pub payable_after_blocks: u64,
    pub pulse_min_service_nodes: usize,
    /// Seconds an uptime proof timestamp may deviate from local time
    pub uptime_proof_tolerance: u64,
    /// Seconds between uptime proofs
    pub uptime_proof_frequency: u64,
    pub governance_reward_interval: u64,
    /// Blocks an expired node stays in the recently-expired map
    pub eth_exit_buffer: u64,
}

impl NetworkConfig {
    pub fn for_network(network: NetworkType) -> Self {
        match network {
            NetworkType::Mainnet => Self {
                network,
                staking_requirement: 15_000 * COIN,
                staking_lock_blocks: 21_600,
                payable_after_blocks: 720,
                pulse_min_service_nodes: 50,
                uptime_proof_tolerance: 5 * 60,
                uptime_proof_frequency: 60 * 60,
                governance_reward_interval: 5_040,
                eth_exit_buffer: 720,
            },
            NetworkType::Testnet | NetworkType::Devnet => Self {
                network,
                staking_requirement: 100 * COIN,
                staking_lock_blocks: 1_440,
                payable_after_blocks: 4,
                pulse_min_service_nodes: 12,
                uptime_proof_tolerance: 5 * 60,
                uptime_proof_frequency: 10 * 60,
                governance_reward_interval: 1_000,
                eth_exit_buffer: 720,
            },
            NetworkType::Fakechain => Self {
                network,
                staking_requirement: 100 * COIN,
                staking_lock_blocks: 30,
                payable_after_blocks: 1,
                pulse_min_service_nodes: 12,
                uptime_proof_tolerance: 5 * 60,
                uptime_proof_frequency: 10 * 60,
                governance_reward_interval: 100,
                eth_exit_buffer: 720,
            },
        }
    }

    pub fn is_fakechain(&self) -> bool {
        self.network == NetworkType::Fakechain
    }
}
