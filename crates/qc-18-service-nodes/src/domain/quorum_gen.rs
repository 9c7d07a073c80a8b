//! # Quorum Generator
//!
//! Committees are pure functions of `(hardfork, seed hash, node snapshot)`.
//!
//! ## Seeding
//!
//! | Hardfork | Seed |
//! |----------|------|
//! | < HF16 | `u64_le(hash[0..8]) + quorum_type` into MT19937-64 |
//! | >= HF16 | `seed_seq([quorum_type, hash as 8 LE u32 words])` |
//!
//! ## Obligations / Checkpointing / Blink
//!
//! A shuffled index list over the candidates; the first N entries become
//! validators and the following ones workers. Obligations workers may be
//! decommissioned nodes, so the list spans `active ++ decommissioned` and a
//! two-pass partial shuffle keeps validators inside the active prefix:
//!
//! ```text
//!       shuffle 2
//!       |==================================|
//! shuffle 1                                |
//! |==============|                         |
//! 0     N        Y (= active)              Z
//! ```
//!
//! ## Pulse
//!
//! Candidates are ordered by `pulse_sorter` so nodes that validated least
//! recently come first. Slot `i` swaps in a candidate from the window of
//! `(n - 1) / 2` entries starting at `i`, one fresh RNG per slot seeded from
//! ancestor entropy.

use super::info::ServiceNodeInfo;
use super::quorum::{Quorum, QuorumType};
use super::registry::{InfoPtr, RegistryState};
use super::rng::{shuffle_portable, uniform_distribution_portable, Mt19937_64};
use super::rules::{
    BLINK_EXPIRY_BUFFER, BLINK_MIN_VOTES, BLINK_QUORUM_INTERVAL, BLINK_SUBQUORUM_SIZE,
    CHECKPOINT_INTERVAL, CHECKPOINT_QUORUM_SIZE, PULSE_QUORUM_ENTROPY_LAG,
    PULSE_QUORUM_NUM_VALIDATORS, PULSE_QUORUM_SIZE, REORG_SAFETY_BUFFER_BLOCKS_POST_HF12,
    STATE_CHANGE_MIN_NODES_TO_TEST, STATE_CHANGE_NTH_OF_THE_NETWORK_TO_TEST,
    STATE_CHANGE_QUORUM_SIZE, TESTNET_CHECKPOINT_DECOMMISSIONED_CUTOFF,
};
use crate::config::NetworkType;
use crate::error::{ServiceNodeError, ServiceNodeResult};
use crate::ports::outbound::{BlockchainReader, CryptoProvider};
use shared_types::{HardFork, Hash, PublicKey, NULL_PUBKEY};
use std::sync::Arc;

/// RNG for quorum `quorum_type` seeded from `hash`.
pub fn quorum_rng(hf: HardFork, hash: &Hash, quorum_type: QuorumType) -> Mt19937_64 {
    if hf >= HardFork::PULSE {
        let mut words = [0u32; 9];
        words[0] = u32::from(quorum_type.as_u8());
        for (word, chunk) in words[1..].iter_mut().zip(hash.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Mt19937_64::from_seed_seq(&words)
    } else {
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&hash[..8]);
        let seed = u64::from_le_bytes(seed_bytes).wrapping_add(u64::from(quorum_type.as_u8()));
        Mt19937_64::new(seed)
    }
}

/// Shuffled `0..list_size`.
///
/// With `0 < sublist_size < list_size` and `0 < sublist_up_to < list_size`,
/// the first `sublist_size` entries are drawn only from `0..sublist_up_to`.
pub fn generate_shuffled_index_list(
    hf: HardFork,
    list_size: usize,
    block_hash: &Hash,
    quorum_type: QuorumType,
    sublist_size: usize,
    sublist_up_to: usize,
) -> Vec<usize> {
    let mut result: Vec<usize> = (0..list_size).collect();
    let mut rng = quorum_rng(hf, block_hash, quorum_type);

    let partial = (0 < sublist_size && sublist_size < list_size)
        && (0 < sublist_up_to && sublist_up_to < list_size);
    if partial {
        let mut rng_copy = rng.clone();
        shuffle_portable(&mut result[..sublist_up_to], &mut rng);
        shuffle_portable(&mut result[sublist_size..], &mut rng_copy);
    } else {
        shuffle_portable(&mut result, &mut rng);
    }
    result
}

/// Entropy for the Pulse quorum of the block after `top_hash`.
///
/// Empty when the chain is too short or an ancestor is unavailable.
pub fn get_pulse_entropy_for_next_block(
    chain: &dyn BlockchainReader,
    crypto: &dyn CryptoProvider,
    top_hash: &Hash,
    pulse_round: u8,
) -> Vec<Hash> {
    let Some(top) = chain.block_by_hash(top_hash) else {
        return Vec::new();
    };
    if top.height < PULSE_QUORUM_ENTROPY_LAG {
        return Vec::new();
    }

    let start_height = top.height - PULSE_QUORUM_ENTROPY_LAG;
    let end_height = start_height + PULSE_QUORUM_SIZE as u64;

    let mut entropy = Vec::with_capacity(PULSE_QUORUM_SIZE);
    let mut cursor = top;
    loop {
        if cursor.height < end_height {
            let mut data = Vec::with_capacity(1 + 32);
            data.push(pulse_round);
            if cursor.major_version >= HardFork::PULSE && cursor.has_pulse_components() {
                data.extend_from_slice(&cursor.pulse.random_value);
            } else {
                data.extend_from_slice(&cursor.hash);
            }
            entropy.push(crypto.fast_hash(&data));
        }
        if cursor.height <= start_height {
            break;
        }
        match chain.block_by_hash(&cursor.prev_hash) {
            Some(parent) => cursor = parent,
            None => return Vec::new(),
        }
    }

    entropy.reverse();
    if entropy.len() != PULSE_QUORUM_SIZE {
        return Vec::new();
    }
    entropy
}

/// Pulse quorum for a block led by `block_leader` in `round`.
///
/// Returns an empty quorum when there are too few nodes or entropy is missing.
pub fn generate_pulse_quorum(
    pulse_min_service_nodes: usize,
    block_leader: &PublicKey,
    hf: HardFork,
    active: &[(PublicKey, InfoPtr)],
    entropy: &[Hash],
    round: u8,
) -> Quorum {
    let mut result = Quorum::default();
    if active.len() < pulse_min_service_nodes
        || *block_leader == NULL_PUBKEY
        || hf < HardFork::PULSE
        || entropy.len() != PULSE_QUORUM_SIZE
    {
        return result;
    }

    let mut candidates: Vec<(&PublicKey, &ServiceNodeInfo)> = active
        .iter()
        .filter(|(key, _)| round > 0 || key != block_leader)
        .map(|(key, info)| (key, info.as_ref()))
        .collect();
    candidates.sort_by(|a, b| (a.1.pulse_sorter, a.0).cmp(&(b.1.pulse_sorter, b.0)));

    let block_producer = if round == 0 {
        *block_leader
    } else {
        if candidates.is_empty() {
            return result;
        }
        let mut rng = quorum_rng(hf, &entropy[0], QuorumType::Pulse);
        let index = uniform_distribution_portable(&mut rng, candidates.len() as u64) as usize;
        *candidates.remove(index).0
    };

    if candidates.len() < PULSE_QUORUM_NUM_VALIDATORS {
        return result;
    }

    // Each slot swaps in a node drawn from the next `partition` candidates,
    // so validators lean towards the least recently used half. With at
    // least PULSE_QUORUM_NUM_VALIDATORS candidates the partition is never 0.
    let partition = (candidates.len() - 1) / 2;
    for i in 0..PULSE_QUORUM_NUM_VALIDATORS {
        let mut rng = quorum_rng(hf, &entropy[i + 1], QuorumType::Pulse);
        let available = partition.min(candidates.len() - i) as u64;
        let swap_index = i + uniform_distribution_portable(&mut rng, available) as usize;
        candidates.swap(i, swap_index);
    }

    result.workers.push(block_producer);
    result.validators = candidates
        .iter()
        .take(PULSE_QUORUM_NUM_VALIDATORS)
        .map(|(key, _)| **key)
        .collect();
    result
}

/// True when `quorum` has a producer and a full validator set.
pub fn is_complete_pulse_quorum(quorum: &Quorum) -> bool {
    quorum.workers.len() == 1 && quorum.validators.len() == PULSE_QUORUM_NUM_VALIDATORS
}

/// Obligations, checkpointing and blink quorums for `state` after its block.
pub fn generate_other_quorums(
    state: &mut RegistryState,
    active: &[(PublicKey, InfoPtr)],
    network: NetworkType,
    hf: HardFork,
) -> ServiceNodeResult<()> {
    let decommissioned = if hf >= HardFork::CHECKPOINTING {
        state.decommissioned_service_nodes_infos()
    } else {
        Vec::new()
    };

    let max_type = QuorumType::max_for_hf(hf);
    for quorum_type in QuorumType::ALL
        .into_iter()
        .filter(|quorum_type| *quorum_type <= max_type)
    {
        let mut quorum = Quorum::default();
        match quorum_type {
            QuorumType::Obligations => {
                let total_nodes = active.len() + decommissioned.len();
                let num_validators = active.len().min(STATE_CHANGE_QUORUM_SIZE);
                let indexes = generate_shuffled_index_list(
                    hf,
                    total_nodes,
                    &state.block_hash,
                    quorum_type,
                    num_validators,
                    active.len(),
                );
                let remaining = total_nodes - num_validators;
                let num_workers = remaining.min(
                    STATE_CHANGE_MIN_NODES_TO_TEST
                        .max(remaining / STATE_CHANGE_NTH_OF_THE_NETWORK_TO_TEST),
                );

                for &index in &indexes[..num_validators] {
                    quorum.validators.push(pick(active, index, quorum_type)?);
                }
                for &index in &indexes[num_validators..num_validators + num_workers] {
                    quorum
                        .workers
                        .push(pick_spanning(active, &decommissioned, index, quorum_type)?);
                }
            }
            QuorumType::Checkpointing => {
                if (state.height + REORG_SAFETY_BUFFER_BLOCKS_POST_HF12) % CHECKPOINT_INTERVAL != 0 {
                    continue;
                }
                let mut total_nodes = active.len();
                if network == NetworkType::Testnet
                    && state.height < TESTNET_CHECKPOINT_DECOMMISSIONED_CUTOFF
                {
                    total_nodes += decommissioned.len();
                }
                if total_nodes >= CHECKPOINT_QUORUM_SIZE {
                    let indexes = generate_shuffled_index_list(
                        hf,
                        total_nodes,
                        &state.block_hash,
                        quorum_type,
                        0,
                        0,
                    );
                    for &index in indexes.iter().take(CHECKPOINT_QUORUM_SIZE) {
                        quorum
                            .validators
                            .push(pick_spanning(active, &decommissioned, index, quorum_type)?);
                    }
                }
            }
            QuorumType::Blink => {
                if state.height % BLINK_QUORUM_INTERVAL != 0 {
                    continue;
                }
                let eligible: Vec<(PublicKey, InfoPtr)> = active
                    .iter()
                    .filter(|(_, info)| {
                        info.requested_unlock_height == 0
                            || info.requested_unlock_height > state.height + BLINK_EXPIRY_BUFFER
                    })
                    .cloned()
                    .collect();
                if eligible.len() >= BLINK_MIN_VOTES {
                    let indexes = generate_shuffled_index_list(
                        hf,
                        eligible.len(),
                        &state.block_hash,
                        quorum_type,
                        0,
                        0,
                    );
                    for &index in indexes.iter().take(BLINK_SUBQUORUM_SIZE) {
                        quorum.validators.push(pick(&eligible, index, quorum_type)?);
                    }
                }
            }
            // Generated before the block's transactions are applied.
            QuorumType::Pulse => continue,
        }
        state.quorums.set(quorum_type, Some(Arc::new(quorum)));
    }
    Ok(())
}

fn pick(
    list: &[(PublicKey, InfoPtr)],
    index: usize,
    quorum_type: QuorumType,
) -> ServiceNodeResult<PublicKey> {
    list.get(index)
        .map(|(key, _)| *key)
        .ok_or_else(|| ServiceNodeError::InvariantViolation {
            reason: format!(
                "{} quorum index {} out of bounds for {} candidates",
                quorum_type.name(),
                index,
                list.len()
            ),
        })
}

/// `index` into `active` followed by `decommissioned`.
fn pick_spanning(
    active: &[(PublicKey, InfoPtr)],
    decommissioned: &[(PublicKey, InfoPtr)],
    index: usize,
    quorum_type: QuorumType,
) -> ServiceNodeResult<PublicKey> {
    match index.checked_sub(active.len()) {
        None => pick(active, index, quorum_type),
        Some(offset) => pick(decommissioned, offset, quorum_type),
    }
}
