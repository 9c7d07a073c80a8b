//! # Consensus Rules
//!
//! Constants and stake arithmetic shared by every part of the registry. All
//! amount math is integer: products are widened to 128 bits before dividing.

use crate::config::{NetworkConfig, NetworkType};
use shared_types::HardFork;
use std::net::Ipv4Addr;

// =============================================================================
// STAKING
// =============================================================================

/// Fixed-point denominator for portion-based registrations.
pub const STAKING_PORTIONS: u64 = 0xffff_ffff_ffff_fffc;
/// Denominator for amount-based operator fees (basis points).
pub const STAKING_FEE_BASIS: u64 = 10_000;
pub const MAX_CONTRIBUTORS_V1: usize = 4;
pub const MAX_CONTRIBUTORS_HF19: usize = 10;
/// Extra blocks a pre-infinite-staking registration stays locked.
pub const STAKING_REQUIREMENT_LOCK_BLOCKS_EXCESS: u64 = 20;
pub const KEY_IMAGE_AWAITING_UNLOCK_HEIGHT: u64 = 0;
/// Largest unlock time interpreted as a height rather than a timestamp.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Contributors below this share of the requirement are "small".
pub const SMALL_CONTRIBUTOR_THRESHOLD_NUM: u64 = 2_499;
pub const SMALL_CONTRIBUTOR_THRESHOLD_DEN: u64 = 100_000;
/// HF19 compared against this raw atomic amount.
pub const LEGACY_SMALL_CONTRIBUTOR_THRESHOLD: u64 = 3_749;
pub const SMALL_CONTRIBUTOR_UNLOCK_TIMER: u64 = 21_600;

// =============================================================================
// TIMING
// =============================================================================

pub const TARGET_BLOCK_TIME: u64 = 120;
pub const BLOCKS_PER_HOUR: u64 = 3_600 / TARGET_BLOCK_TIME;
pub const BLOCKS_PER_DAY: u64 = 24 * BLOCKS_PER_HOUR;

pub const VOTE_LIFETIME: u64 = 60;
pub const STATE_CHANGE_TX_LIFETIME_IN_BLOCKS: u64 = VOTE_LIFETIME;
pub const VOTE_OR_TX_VERIFY_HEIGHT_BUFFER: u64 = 5;
/// Checkpoint and obligations quorums are computed this far behind the tip.
pub const REORG_SAFETY_BUFFER_BLOCKS_POST_HF12: u64 = 11;

// =============================================================================
// QUORUMS
// =============================================================================

pub const STATE_CHANGE_QUORUM_SIZE: usize = 10;
pub const STATE_CHANGE_MIN_VOTES_TO_CHANGE_STATE: usize = 7;
pub const STATE_CHANGE_NTH_OF_THE_NETWORK_TO_TEST: usize = 100;
pub const STATE_CHANGE_MIN_NODES_TO_TEST: usize = 50;

pub const CHECKPOINT_INTERVAL: u64 = 4;
pub const CHECKPOINT_QUORUM_SIZE: usize = 20;
pub const CHECKPOINT_MIN_VOTES: usize = 13;
/// Testnet checkpoint quorums drew from decommissioned nodes too below this height.
pub const TESTNET_CHECKPOINT_DECOMMISSIONED_CUTOFF: u64 = 85_357;

pub const BLINK_QUORUM_INTERVAL: u64 = 5;
pub const BLINK_SUBQUORUM_SIZE: usize = 10;
pub const BLINK_MIN_VOTES: usize = 7;
pub const BLINK_EXPIRY_BUFFER: u64 = 45;

pub const PULSE_QUORUM_NUM_VALIDATORS: usize = 11;
pub const PULSE_QUORUM_SIZE: usize = PULSE_QUORUM_NUM_VALIDATORS + 1;
pub const PULSE_BLOCK_REQUIRED_SIGNATURES: usize = 7;
pub const PULSE_QUORUM_ENTROPY_LAG: u64 = 21;
pub const PULSE_ROUND_TIME: u64 = 60;
/// Rounds before block production falls back to mining.
pub const PULSE_MAX_ROUNDS: u64 = 255;
/// Bitset covering all Pulse validators.
pub const PULSE_VALIDATOR_BITSET_LIMIT: u32 = 1 << PULSE_QUORUM_NUM_VALIDATORS;

// =============================================================================
// HISTORY
// =============================================================================

pub const STORE_LONG_TERM_STATE_INTERVAL: u64 = 10_000;
pub const DEFAULT_SHORT_TERM_STATE_HISTORY: u64 = 6 * VOTE_LIFETIME;

pub const UNASSIGNED_SWARM_ID: u64 = u64::MAX;

// =============================================================================
// DECOMMISSION CREDIT
// =============================================================================

pub const DECOMMISSION_CREDIT_PER_DAY: i64 = 24;
pub const DECOMMISSION_INITIAL_CREDIT: i64 = 60;
pub const DECOMMISSION_MAX_CREDIT: i64 = 720;

/// Batched reward amounts are tracked in thousandths of an atomic unit.
pub const BATCH_REWARD_FACTOR: u64 = 1_000;

// =============================================================================
// PROOFS
// =============================================================================

pub const X25519_MAP_PRUNING_INTERVAL: u64 = 5 * 60;
pub const X25519_MAP_PRUNING_LAG: u64 = 24 * 60 * 60;
/// Proofs of nodes that left the registry are dropped after this long.
pub const PROOF_RETENTION_AFTER_DEREGISTRATION: u64 = 6 * 60 * 60;
pub const REACHABLE_MAX_FAILURE_VALIDITY: u64 = 5 * 60;

/// Minimum software versions for uptime proofs, by hardfork.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinimumProofVersions {
    pub hardfork: HardFork,
    pub oxend: [u16; 3],
    pub lokinet: [u16; 3],
    pub storage_server: [u16; 3],
}

pub const MIN_UPTIME_PROOF_VERSIONS: [MinimumProofVersions; 2] = [
    MinimumProofVersions {
        hardfork: HardFork::Hf19,
        oxend: [10, 1, 0],
        lokinet: [0, 9, 9],
        storage_server: [2, 4, 0],
    },
    MinimumProofVersions {
        hardfork: HardFork::Hf21,
        oxend: [11, 0, 0],
        lokinet: [0, 9, 11],
        storage_server: [2, 6, 0],
    },
];

// =============================================================================
// ARITHMETIC
// =============================================================================

/// `a * b / c` without intermediate overflow.
pub fn mul128_div64(a: u64, b: u64, c: u64) -> u64 {
    if c == 0 {
        return 0;
    }
    let result = (a as u128 * b as u128) / c as u128;
    u64::try_from(result).unwrap_or(u64::MAX)
}

pub fn portions_to_amount(portions: u64, staking_requirement: u64) -> u64 {
    mul128_div64(portions, staking_requirement, STAKING_PORTIONS)
}

/// Two amounts agree up to one atomic unit.
pub fn within_one(a: u64, b: u64) -> bool {
    a.abs_diff(b) <= 1
}

pub fn max_contributors_for_hf(hf: HardFork) -> usize {
    if hf >= HardFork::REWARD_BATCHING {
        MAX_CONTRIBUTORS_HF19
    } else {
        MAX_CONTRIBUTORS_V1
    }
}

/// Height at which a locked key image unlocks when requested at `curr_height`.
pub fn get_locked_key_image_unlock_height(
    net: &NetworkConfig,
    node_register_height: u64,
    curr_height: u64,
) -> u64 {
    let lock = net.staking_lock_blocks.max(1);
    let elapsed = curr_height.saturating_sub(node_register_height);
    curr_height + (lock - (elapsed % lock))
}

/// Smallest contribution accepted for the next slot.
pub fn get_min_node_contribution(
    hf: HardFork,
    staking_requirement: u64,
    total_reserved: u64,
    num_contributions: usize,
) -> u64 {
    let needed = staking_requirement.saturating_sub(total_reserved);
    if hf < HardFork::INFINITE_STAKING {
        return needed.min(staking_requirement / MAX_CONTRIBUTORS_V1 as u64);
    }

    let max_contributors = max_contributors_for_hf(hf);
    if num_contributions >= max_contributors {
        return u64::MAX;
    }
    if hf >= HardFork::REWARD_BATCHING && num_contributions == 0 {
        return minimum_operator_contribution(staking_requirement);
    }
    needed / (max_contributors - num_contributions) as u64
}

/// Largest contribution accepted given what is already reserved.
pub fn get_max_node_contribution(hf: HardFork, staking_requirement: u64, total_reserved: u64) -> u64 {
    if hf >= HardFork::PULSE {
        let remaining = staking_requirement.saturating_sub(total_reserved);
        return mul128_div64(remaining, 101, 100);
    }
    u64::MAX
}

pub fn minimum_operator_contribution(staking_requirement: u64) -> u64 {
    staking_requirement / 4
}

/// Minimum portions for contributor slot `num_contributors`.
fn get_min_remaining_portions(num_contributors: usize, total_reserved: u64) -> u64 {
    if num_contributors == 0 {
        return STAKING_PORTIONS / 4;
    }
    if num_contributors >= MAX_CONTRIBUTORS_V1 {
        return u64::MAX;
    }
    let remaining = STAKING_PORTIONS.saturating_sub(total_reserved);
    remaining / (MAX_CONTRIBUTORS_V1 - num_contributors) as u64
}

/// Validate amount-based reserved stakes (HF19+).
pub fn check_service_node_stakes(hf: HardFork, staking_requirement: u64, stakes: &[u64]) -> bool {
    if hf < HardFork::REWARD_BATCHING || stakes.is_empty() {
        return false;
    }
    let mut reserved: u64 = 0;
    for (i, &stake) in stakes.iter().enumerate() {
        let min_stake = if i == 0 {
            minimum_operator_contribution(staking_requirement)
        } else {
            get_min_node_contribution(hf, staking_requirement, reserved, i)
        };
        if stake < min_stake {
            return false;
        }
        reserved = match reserved.checked_add(stake) {
            Some(total) if total <= staking_requirement => total,
            _ => return false,
        };
    }
    true
}

/// Validate portion-based reserved stakes (before HF19).
pub fn check_service_node_portions(hf: HardFork, portions: &[u64]) -> bool {
    if hf >= HardFork::REWARD_BATCHING || portions.is_empty() {
        return false;
    }
    if portions.len() > MAX_CONTRIBUTORS_V1 {
        return false;
    }
    let mut reserved: u64 = 0;
    for (i, &portion) in portions.iter().enumerate() {
        if portion < get_min_remaining_portions(i, reserved) {
            return false;
        }
        reserved = match reserved.checked_add(portion) {
            Some(total) if total <= STAKING_PORTIONS => total,
            _ => return false,
        };
    }
    true
}

/// Credit left after `blocks_down` blocks of decommission.
pub fn recommission_credit(credit: i64, blocks_down: i64) -> i64 {
    (credit.min(DECOMMISSION_MAX_CREDIT) - blocks_down).max(0)
}

/// True when `ip` (host order, `a.b.c.d` = `0xaabbccdd`) is globally routable.
pub fn is_public_ip(ip: u32) -> bool {
    let addr = Ipv4Addr::from(ip);
    let octets = addr.octets();
    let shared = octets[0] == 100 && (64..128).contains(&octets[1]);
    !(addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_broadcast()
        || addr.is_documentation()
        || addr.is_unspecified()
        || addr.is_multicast()
        || shared
        || octets[0] == 0)
}

/// Whether the network enforces minimum proof versions.
pub fn enforces_proof_versions(network: NetworkType) -> bool {
    network != NetworkType::Devnet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COIN;

    #[test]
    fn test_mul128_div64_no_overflow() {
        assert_eq!(mul128_div64(u64::MAX, u64::MAX, u64::MAX), u64::MAX);
        assert_eq!(mul128_div64(STAKING_PORTIONS / 2, 100, STAKING_PORTIONS), 50);
        // A third of the portions floors to 33
        assert_eq!(mul128_div64(STAKING_PORTIONS / 3, 100, STAKING_PORTIONS), 33);
        assert_eq!(mul128_div64(7, 3, 0), 0);
    }

    #[test]
    fn test_within_one() {
        assert!(within_one(10, 11));
        assert!(within_one(11, 10));
        assert!(!within_one(10, 12));
    }

    #[test]
    fn test_min_contribution_curve() {
        let req = 100 * COIN;
        assert_eq!(get_min_node_contribution(HardFork::Hf10, req, 0, 0), 25 * COIN);
        assert_eq!(get_min_node_contribution(HardFork::Hf10, req, 90 * COIN, 2), 10 * COIN);
        assert_eq!(get_min_node_contribution(HardFork::Hf16, req, 40 * COIN, 1), 20 * COIN);
        assert_eq!(get_min_node_contribution(HardFork::Hf16, req, 0, 4), u64::MAX);
        assert_eq!(get_min_node_contribution(HardFork::Hf19, req, 0, 0), 25 * COIN);
        assert_eq!(get_min_node_contribution(HardFork::Hf19, req, 50 * COIN, 5), 10 * COIN);
    }

    #[test]
    fn test_max_contribution_allows_one_percent_over() {
        let req = 100 * COIN;
        assert_eq!(get_max_node_contribution(HardFork::Hf16, req, 0), 101 * COIN);
        assert_eq!(get_max_node_contribution(HardFork::Hf15, req, 0), u64::MAX);
    }

    #[test]
    fn test_check_stakes() {
        let req = 100 * COIN;
        assert!(check_service_node_stakes(HardFork::Hf19, req, &[50 * COIN, 50 * COIN]));
        assert!(check_service_node_stakes(HardFork::Hf19, req, &[req]));
        assert!(!check_service_node_stakes(HardFork::Hf19, req, &[20 * COIN]));
        assert!(!check_service_node_stakes(HardFork::Hf19, req, &[60 * COIN, 60 * COIN]));
        assert!(!check_service_node_stakes(HardFork::Hf18, req, &[req]));
    }

    #[test]
    fn test_check_portions() {
        let quarter = STAKING_PORTIONS / 4;
        assert!(check_service_node_portions(HardFork::Hf18, &[STAKING_PORTIONS]));
        assert!(check_service_node_portions(
            HardFork::Hf18,
            &[quarter, quarter, quarter, STAKING_PORTIONS - 3 * quarter]
        ));
        assert!(!check_service_node_portions(HardFork::Hf18, &[quarter - 1]));
        assert!(!check_service_node_portions(HardFork::Hf19, &[STAKING_PORTIONS]));
    }

    #[test]
    fn test_unlock_height_rounds_to_lock_period() {
        let net = NetworkConfig::for_network(NetworkType::Fakechain);
        assert_eq!(get_locked_key_image_unlock_height(&net, 100, 100), 130);
        assert_eq!(get_locked_key_image_unlock_height(&net, 100, 110), 130);
        assert_eq!(get_locked_key_image_unlock_height(&net, 100, 131), 160);
    }

    #[test]
    fn test_recommission_credit() {
        assert_eq!(recommission_credit(60, 10), 50);
        assert_eq!(recommission_credit(10, 60), 0);
        assert_eq!(recommission_credit(5_000, 0), DECOMMISSION_MAX_CREDIT);
    }

    #[test]
    fn test_public_ip() {
        assert!(is_public_ip(u32::from(Ipv4Addr::new(8, 8, 8, 8))));
        assert!(!is_public_ip(u32::from(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(!is_public_ip(u32::from(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(!is_public_ip(u32::from(Ipv4Addr::new(100, 64, 0, 1))));
        assert!(!is_public_ip(0));
    }
}
