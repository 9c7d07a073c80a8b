//! Service node info entity
//!
//! One `ServiceNodeInfo` exists per registered public key. The registry holds
//! them behind `Arc` and mutates through `Arc::make_mut`, so a snapshot taken
//! before a block never observes that block's changes.

use super::rules::{
    recommission_credit, BLOCKS_PER_DAY, DECOMMISSION_CREDIT_PER_DAY, DECOMMISSION_INITIAL_CREDIT,
    DECOMMISSION_MAX_CREDIT, UNASSIGNED_SWARM_ID,
};
use crate::config::NetworkConfig;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_types::{
    AccountAddress, BlsPublicKey, EthAddress, HardFork, KeyImage, NewState, PublicKey,
};

/// Schema version of a stored `ServiceNodeInfo`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum InfoVersion {
    #[default]
    V0 = 0,
    V1AddRegistrationHf = 1,
    V2EdKeys = 2,
    V3QuorumnetPort = 3,
    V4NoProofs = 4,
    V5PulseRecommCredit = 5,
    V6ReassignSortKeys = 6,
    V7DecommissionReason = 7,
}

impl InfoVersion {
    pub const CURRENT: Self = Self::V7DecommissionReason;
}

/// A stake output locked until unlock is requested (infinite staking).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LockedContribution {
    /// One-time output key; signs the unlock request
    pub key_image_pub_key: PublicKey,
    pub key_image: KeyImage,
    pub amount: u64,
}

/// A funder of a service node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Contributor {
    /// Contributed so far
    pub amount: u64,
    /// Reserved by the registration (or bumped when exceeded)
    pub reserved: u64,
    pub address: AccountAddress,
    pub locked_contributions: Vec<LockedContribution>,
    pub ethereum_address: EthAddress,
}

impl Contributor {
    pub fn new(reserved: u64, address: AccountAddress) -> Self {
        Self {
            reserved,
            address,
            ..Self::default()
        }
    }
}

/// Pulse rotation key: least recently validating nodes sort first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PulseSorter {
    pub last_height_validating_in_quorum: u64,
    pub quorum_index: u8,
}

/// Registry entry for one service node.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNodeInfo {
    pub version: InfoVersion,
    pub registration_hf_version: HardFork,
    /// 0 until an unlock is requested
    pub requested_unlock_height: u64,
    pub last_reward_block_height: u64,
    pub last_reward_transaction_index: u32,
    pub decommission_count: u32,
    /// Positive: active since. Negative: decommissioned, negated start of the prior active period.
    pub active_since_height: i64,
    pub last_decommission_height: u64,
    pub last_decommission_reason_consensus_all: u16,
    pub last_decommission_reason_consensus_any: u16,
    pub contributors: Vec<Contributor>,
    pub total_contributed: u64,
    pub total_reserved: u64,
    pub staking_requirement: u64,
    pub portions_for_operator: u64,
    pub swarm_id: u64,
    pub operator_address: AccountAddress,
    pub operator_ethereum_address: EthAddress,
    #[serde_as(as = "Bytes")]
    pub bls_public_key: BlsPublicKey,
    pub last_ip_change_height: u64,
    pub registration_height: u64,
    pub recommission_credit: i64,
    pub pulse_sorter: PulseSorter,
}

impl Default for ServiceNodeInfo {
    fn default() -> Self {
        Self {
            version: InfoVersion::CURRENT,
            registration_hf_version: HardFork::default(),
            requested_unlock_height: 0,
            last_reward_block_height: 0,
            last_reward_transaction_index: 0,
            decommission_count: 0,
            active_since_height: 0,
            last_decommission_height: 0,
            last_decommission_reason_consensus_all: 0,
            last_decommission_reason_consensus_any: 0,
            contributors: Vec::new(),
            total_contributed: 0,
            total_reserved: 0,
            staking_requirement: 0,
            portions_for_operator: 0,
            swarm_id: UNASSIGNED_SWARM_ID,
            operator_address: AccountAddress::default(),
            operator_ethereum_address: EthAddress::default(),
            bls_public_key: [0u8; 64],
            last_ip_change_height: 0,
            registration_height: 0,
            recommission_credit: DECOMMISSION_INITIAL_CREDIT,
            pulse_sorter: PulseSorter::default(),
        }
    }
}

impl ServiceNodeInfo {
    pub fn is_fully_funded(&self) -> bool {
        self.total_contributed >= self.staking_requirement
    }

    pub fn is_decommissioned(&self) -> bool {
        self.active_since_height < 0
    }

    pub fn is_active(&self) -> bool {
        self.is_fully_funded() && !self.is_decommissioned()
    }

    /// Active long enough to be listed as payable.
    pub fn is_payable(&self, height: u64, net: &NetworkConfig) -> bool {
        self.is_active()
            && height as i128 >= self.active_since_height as i128 + net.payable_after_blocks as i128
    }

    pub fn total_num_locked_contributions(&self) -> usize {
        self.contributors
            .iter()
            .map(|contributor| contributor.locked_contributions.len())
            .sum()
    }

    pub fn has_bls_key(&self) -> bool {
        self.bls_public_key != [0u8; 64]
    }

    /// Whether votes about this node at `height` are meaningful.
    pub fn can_be_voted_on(&self, height: u64) -> bool {
        if !self.is_fully_funded() || height <= self.registration_height {
            return false;
        }
        let height = height as i64;
        if self.is_decommissioned() {
            height > self.last_decommission_height as i64
        } else {
            height > self.active_since_height
        }
    }

    /// Whether `proposed` is a legal transition at `height`.
    pub fn can_transition_to_state(&self, hf: HardFork, height: u64, proposed: NewState) -> bool {
        if hf >= HardFork::ENFORCE_CHECKPOINTS {
            if !self.can_be_voted_on(height) {
                return false;
            }
            match proposed {
                NewState::Deregister if height <= self.registration_height => return false,
                NewState::IpChangePenalty if height <= self.last_ip_change_height => return false,
                _ => {}
            }
        } else if proposed == NewState::Deregister && height < self.registration_height {
            return false;
        }

        if self.is_decommissioned() {
            !matches!(proposed, NewState::Decommission | NewState::IpChangePenalty)
        } else {
            proposed != NewState::Recommission
        }
    }

    /// Contributor slot holding `address`, if any.
    pub fn contributor_index(&self, address: &AccountAddress) -> Option<usize> {
        self.contributors
            .iter()
            .position(|contributor| contributor.address == *address)
    }
}

/// Credit (in blocks of allowed downtime) a node has earned at `height`.
pub fn calculate_decommission_credit(info: &ServiceNodeInfo, height: u64) -> i64 {
    let blocks_up = if info.is_decommissioned() {
        info.last_decommission_height as i64 + info.active_since_height
    } else {
        height as i64 - info.active_since_height
    };

    if blocks_up < 0 {
        return 0;
    }
    let credit = blocks_up * DECOMMISSION_CREDIT_PER_DAY / BLOCKS_PER_DAY as i64
        + info.recommission_credit;
    credit.min(DECOMMISSION_MAX_CREDIT)
}

/// Credit carried into a recommission after `blocks_down` blocks offline.
pub fn credit_after_recommission(info: &ServiceNodeInfo, blocks_down: u64) -> i64 {
    let credit_at_decommission = calculate_decommission_credit(info, info.last_decommission_height);
    recommission_credit(credit_at_decommission, blocks_down as i64)
}
