//! # Registry Properties
//!
//! Invariants that must hold for any input: deterministic quorums,
//! copy-on-write snapshots, stake accounting and Pulse validator rotation.

use super::harness::{fakechain, registry_with_nodes};
use proptest::prelude::*;
use qc_18_service_nodes::adapters::{Ed25519CryptoProvider, InMemoryBlockchain};
use qc_18_service_nodes::config::{NetworkConfig, NetworkType, COIN};
use qc_18_service_nodes::domain::history::{HistoryStore, HistoryView};
use qc_18_service_nodes::domain::info::PulseSorter;
use qc_18_service_nodes::domain::quorum_gen::{
    generate_other_quorums, generate_pulse_quorum, is_complete_pulse_quorum,
};
use qc_18_service_nodes::domain::rules::PULSE_QUORUM_NUM_VALIDATORS;
use qc_18_service_nodes::domain::transitions::TransitionContext;
use qc_18_service_nodes::test_utils::{
    active_nodes, contribution_tx, entropy_for, operator_address, stake_tx, test_crypto,
};
use qc_18_service_nodes::RegistryState;
use shared_types::{Block, HardFork, PublicKey, Transaction, TxExtraField};
use std::sync::Arc;

struct Fixture {
    net: NetworkConfig,
    crypto: Ed25519CryptoProvider,
    chain: InMemoryBlockchain,
    store: HistoryStore,
}

impl Fixture {
    fn new() -> Self {
        Self {
            net: fakechain(),
            crypto: test_crypto(),
            chain: InMemoryBlockchain::new(),
            store: HistoryStore::new(0),
        }
    }

    fn apply(&self, state: &RegistryState, block: &Block, txs: &[Transaction]) -> RegistryState {
        let ctx = TransitionContext {
            net: &self.net,
            crypto: &self.crypto,
            blockchain: &self.chain,
            history: HistoryView::new(state, &self.store),
            my_key: None,
        };
        let mut next = state.clone();
        next.update_from_block(&ctx, block, txs).unwrap();
        next
    }
}

fn block(height: u64) -> Block {
    Block {
        height,
        hash: [height as u8; 32],
        major_version: HardFork::Hf19,
        ..Block::default()
    }
}

// =============================================================================
// DETERMINISM
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_other_quorums_are_deterministic(
        hash in any::<[u8; 32]>(),
        count in 12u8..60,
        height in 100u64..100_000,
    ) {
        let build = || {
            let mut state = registry_with_nodes(height, count);
            state.block_hash = hash;
            let active = state.active_service_nodes_infos();
            generate_other_quorums(&mut state, &active, NetworkType::Fakechain, HardFork::Hf19)
                .unwrap();
            state.quorums
        };
        prop_assert_eq!(build(), build());
    }

    #[test]
    fn prop_pulse_quorum_is_deterministic(
        entropy_seed in any::<u8>(),
        round in 0u8..4,
        count in 13u8..40,
    ) {
        let nodes = active_nodes(count);
        let leader = nodes[0].0;
        let entropy = entropy_for(entropy_seed);
        let first = generate_pulse_quorum(12, &leader, HardFork::Hf19, &nodes, &entropy, round);
        let second = generate_pulse_quorum(12, &leader, HardFork::Hf19, &nodes, &entropy, round);
        prop_assert!(is_complete_pulse_quorum(&first));
        prop_assert_eq!(first, second);
    }
}

// =============================================================================
// COPY-ON-WRITE
// =============================================================================

#[test]
fn test_block_copies_only_touched_entries() {
    let fixture = Fixture::new();
    let state = registry_with_nodes(99, 6);
    let leader = state.get_block_leader().key;
    let leader_reward_height = state.info(&leader).unwrap().last_reward_block_height;

    let mut b = block(100);
    b.miner_tx.extra.push(TxExtraField::ServiceNodeWinner(leader));
    let next = fixture.apply(&state, &b, &[]);

    for (key, info) in &state.service_nodes_infos {
        let after = &next.service_nodes_infos[key];
        if *key == leader {
            assert!(!Arc::ptr_eq(info, after));
        } else {
            assert!(Arc::ptr_eq(info, after));
        }
    }
    assert_eq!(
        state.info(&leader).unwrap().last_reward_block_height,
        leader_reward_height
    );
    assert_eq!(next.info(&leader).unwrap().last_reward_block_height, 100);
}

// =============================================================================
// STAKE INVARIANT
// =============================================================================

#[derive(Clone, Debug)]
enum StakeOp {
    /// Node registers with the operator staking `operator` coins and the
    /// rest reserved for a friend
    Register { seed: u8, operator: u64 },
    /// Friend of node `seed` contributes
    Contribute { seed: u8, amount: u64 },
}

fn stake_op() -> impl Strategy<Value = StakeOp> {
    prop_oneof![
        (1u8..6, 20u64..=100).prop_map(|(seed, operator)| StakeOp::Register { seed, operator }),
        (1u8..6, 1u64..=80).prop_map(|(seed, amount)| StakeOp::Contribute { seed, amount }),
    ]
}

fn stake_op_tx(crypto: &Ed25519CryptoProvider, op: &StakeOp, key_image_seed: u8) -> Transaction {
    match *op {
        StakeOp::Register { seed, operator } => {
            let mut reserved = vec![(operator_address(seed), operator * COIN)];
            if operator < 100 {
                reserved.push((operator_address(seed + 10), (100 - operator) * COIN));
            }
            stake_tx(crypto, seed, HardFork::Hf19, reserved, operator * COIN)
        }
        StakeOp::Contribute { seed, amount } => contribution_tx(
            crypto,
            seed,
            operator_address(seed + 10),
            amount * COIN,
            key_image_seed,
        ),
    }
}

fn check_stake_invariant(state: &RegistryState) -> Result<(), TestCaseError> {
    for (key, info) in &state.service_nodes_infos {
        prop_assert!(
            info.total_reserved <= info.staking_requirement,
            "{:?} reserves {} of {}",
            key,
            info.total_reserved,
            info.staking_requirement
        );
        prop_assert_eq!(
            info.is_active(),
            info.is_fully_funded() && !info.is_decommissioned()
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_stake_invariant_holds(ops in prop::collection::vec(stake_op(), 1..12)) {
        let fixture = Fixture::new();
        let mut state = RegistryState::new(99);
        for (index, op) in ops.iter().enumerate() {
            let tx = stake_op_tx(&fixture.crypto, op, 150 + index as u8);
            state = fixture.apply(&state, &block(100 + index as u64), &[tx]);
            check_stake_invariant(&state)?;
        }
    }
}

// =============================================================================
// PULSE ROTATION
// =============================================================================

#[test]
fn test_pulse_validators_rotate_through_least_recent() {
    let mut state = registry_with_nodes(1_000, 30);
    let leader = *state.service_nodes_infos.keys().next().unwrap();
    let mut previous: Vec<PublicKey> = Vec::new();

    for height in 1_001..1_013u64 {
        let active = state.active_service_nodes_infos();
        let quorum = generate_pulse_quorum(
            12,
            &leader,
            HardFork::Hf19,
            &active,
            &entropy_for(height as u8),
            0,
        );
        assert!(is_complete_pulse_quorum(&quorum));
        assert_eq!(quorum.validators.len(), PULSE_QUORUM_NUM_VALIDATORS);

        // Slot i draws from the `partition` candidates starting at i, so the
        // most recent validators at the tail of the order are never reached.
        let mut order: Vec<(PulseSorter, PublicKey)> = active
            .iter()
            .filter(|(key, _)| *key != leader)
            .map(|(key, info)| (info.pulse_sorter, *key))
            .collect();
        order.sort();
        let partition = (order.len() - 1) / 2;
        let reach = partition + PULSE_QUORUM_NUM_VALIDATORS - 1;
        let eligible: Vec<PublicKey> = order[..reach].iter().map(|(_, key)| *key).collect();
        assert!(quorum.validators.iter().all(|key| eligible.contains(key)));
        let newest: Vec<PublicKey> = order[reach..].iter().map(|(_, key)| *key).collect();
        if height > 1_001 {
            assert!(newest.iter().all(|key| previous.contains(key)));
        }

        for (index, key) in quorum.validators.iter().enumerate() {
            if let Some(info) = state.info_mut(key) {
                info.pulse_sorter = PulseSorter {
                    last_height_validating_in_quorum: height,
                    quorum_index: index as u8,
                };
            }
        }
        previous = quorum.validators.clone();
    }
}
