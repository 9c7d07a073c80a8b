//! # Integration Test Flows
//!
//! End-to-end behaviour of the service node list:
//!
//! 1. **Registration**: reserved contributor slots filled in the registration block
//! 2. **State changes**: votes from a quorum the registry never produced are dropped
//! 3. **Reorgs**: detaching restores the exact snapshot of the earlier height
//! 4. **Persistence**: stored blobs reload into an identical registry
//! 5. **Rewards**: coinbase outputs add up to the service node reward

use super::harness::{fakechain, make_block, registry_with_nodes, ChainHarness, FIRST_SN_HEIGHT};
use qc_18_service_nodes::adapters::InMemoryBlockchain;
use qc_18_service_nodes::config::{NetworkType, COIN};
use qc_18_service_nodes::domain::history::{HistoryStore, HistoryView};
use qc_18_service_nodes::domain::info::{Contributor, ServiceNodeInfo};
use qc_18_service_nodes::domain::quorum_gen::generate_other_quorums;
use qc_18_service_nodes::domain::rewards::{
    deterministic_output_key, distribute_reward_by_portions, service_node_payout_portions,
    validate_miner_tx, BlockRewardParts, MinerTxInfo,
};
use qc_18_service_nodes::domain::rules::{STAKING_FEE_BASIS, STAKING_PORTIONS};
use qc_18_service_nodes::domain::transitions::{BlockOutcome, TransitionContext};
use qc_18_service_nodes::test_utils::{
    contribution_tx, node_pubkey, operator_address, stake_tx_with_fee, state_change_tx,
    test_crypto,
};
use qc_18_service_nodes::{
    BlockVerificationError, BlockchainReader, Quorum, QuorumType, RegistryState, ServiceNodeApi,
};
use shared_types::{Block, HardFork, NewState, Transaction, TxExtraField, TxOutput};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// REGISTRATION
// =============================================================================

#[test]
fn test_registration_with_two_reserved_slots_at_max_fee() {
    let harness = ChainHarness::new();
    let crypto = test_crypto();
    let operator = operator_address(1);
    let friend = operator_address(2);

    let registration = stake_tx_with_fee(
        &crypto,
        1,
        HardFork::Hf19,
        vec![(operator, 60 * COIN), (friend, 40 * COIN)],
        60 * COIN,
        STAKING_FEE_BASIS,
    );
    let contribution = contribution_tx(&crypto, 1, friend, 40 * COIN, 200);
    let block = harness.mine(vec![registration, contribution]);

    let key = node_pubkey(1);
    let entries = harness.list.get_service_node_list_state(&[key]);
    assert_eq!(entries.len(), 1);
    let info = &entries[0].1;
    assert!(info.is_fully_funded());
    assert!(info.is_active());
    assert_eq!(info.active_since_height, block.height as i64);
    assert_eq!(info.total_reserved, 100 * COIN);
    assert_eq!(info.total_contributed, 100 * COIN);
    assert_eq!(info.portions_for_operator, STAKING_PORTIONS);
    assert_eq!(info.contributors.len(), 2);
}

#[test]
fn test_partial_registration_waits_for_reserved_contributor() {
    let harness = ChainHarness::new();
    let crypto = test_crypto();
    let friend = operator_address(2);

    harness.mine(vec![stake_tx_with_fee(
        &crypto,
        1,
        HardFork::Hf19,
        vec![(operator_address(1), 60 * COIN), (friend, 40 * COIN)],
        60 * COIN,
        0,
    )]);
    let key = node_pubkey(1);
    assert!(harness.list.is_service_node(&key, false));
    assert!(!harness.list.is_service_node(&key, true));

    let block = harness.mine(vec![contribution_tx(&crypto, 1, friend, 40 * COIN, 200)]);
    assert!(harness.list.is_service_node(&key, true));
    let (_, info) = harness.list.get_service_node_list_state(&[key]).remove(0);
    assert_eq!(info.active_since_height, block.height as i64);
}

// =============================================================================
// STATE CHANGES
// =============================================================================

#[test]
fn test_state_change_from_unknown_quorum_rejected() {
    let net = fakechain();
    let crypto = test_crypto();
    let chain = InMemoryBlockchain::new();
    let store = HistoryStore::new(0);

    let mut state = registry_with_nodes(100, 20);
    state.block_hash = [42; 32];
    let active = state.active_service_nodes_infos();
    generate_other_quorums(&mut state, &active, NetworkType::Fakechain, HardFork::Hf19).unwrap();
    let real = state.quorums.get(QuorumType::Obligations).unwrap();

    let outsiders: Vec<_> = active
        .iter()
        .map(|(key, _)| *key)
        .filter(|key| !real.validators.contains(key))
        .collect();
    let forged = Quorum {
        validators: outsiders,
        workers: real.workers.clone(),
    };
    let tx = state_change_tx(
        &crypto,
        &forged,
        100,
        0,
        NewState::Deregister,
        forged.validators.len(),
    );

    let ctx = TransitionContext {
        net: &net,
        crypto: &crypto,
        blockchain: &chain,
        history: HistoryView::new(&state, &store),
        my_key: None,
    };
    let block = Block {
        height: 101,
        hash: [101; 32],
        major_version: HardFork::Hf19,
        ..Block::default()
    };
    let mut next = state.clone();
    let outcome = next.update_from_block(&ctx, &block, &[tx]).unwrap();

    assert_eq!(outcome, BlockOutcome::default());
    assert_eq!(next.service_nodes_infos, state.service_nodes_infos);
    assert!(next.info(&real.workers[0]).unwrap().is_active());
}

// =============================================================================
// REORGS
// =============================================================================

#[test]
fn test_detach_five_blocks_restores_snapshot() {
    let harness = ChainHarness::new();
    let mut snapshots: BTreeMap<u64, RegistryState> = BTreeMap::new();
    for seed in 1..=3 {
        harness.register(seed);
        snapshots.insert(harness.list.height(), harness.list.state());
    }
    for _ in 0..10 {
        harness.mine(Vec::new());
        snapshots.insert(harness.list.height(), harness.list.state());
    }

    let original_height = harness.list.height();
    let detach_from = original_height - 4;
    harness.chain.pop_blocks_from(detach_from);
    harness.list.blockchain_detached(detach_from).unwrap();

    assert_eq!(harness.list.height(), original_height - 5);
    assert_eq!(harness.list.state(), snapshots[&(original_height - 5)]);
}

#[test]
fn test_reorg_onto_alt_chain() {
    let harness = ChainHarness::new();
    harness.register(1);
    let fork_point = harness.mine(Vec::new());
    let canonical = harness.mine(vec![stake_tx_with_fee(
        &test_crypto(),
        2,
        HardFork::Hf19,
        vec![(operator_address(2), 100 * COIN)],
        100 * COIN,
        0,
    )]);
    assert!(harness.list.is_service_node(&node_pubkey(2), true));

    let alt = make_block(canonical.height, fork_point.hash, 1, &[]);
    harness.chain.add_alt_block(alt.clone(), Vec::new());
    harness.list.alt_block_add(&alt, &[], None).unwrap();
    assert!(harness.list.is_service_node(&node_pubkey(2), true));

    // Switch to the alt chain: its block never registered node 2.
    harness.chain.pop_blocks_from(canonical.height);
    harness.list.blockchain_detached(canonical.height).unwrap();
    harness.chain.add_block(alt.clone(), Vec::new());
    harness.list.block_add(&alt, &[], None).unwrap();

    assert_eq!(harness.list.height(), alt.height);
    assert!(!harness.list.is_service_node(&node_pubkey(2), false));
    assert!(harness.list.is_service_node(&node_pubkey(1), true));
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[test]
fn test_store_and_load_round_trip() {
    let harness = ChainHarness::new();
    for seed in 1..=4 {
        harness.register(seed);
    }
    for _ in 0..5 {
        harness.mine(Vec::new());
    }
    harness.list.store().unwrap();

    let reloaded = ChainHarness::on_chain(
        Arc::clone(&harness.chain),
        Arc::clone(&harness.data_store),
    );
    assert!(reloaded.list.load(harness.chain.current_height()).unwrap());
    assert_eq!(reloaded.list.state(), harness.list.state());

    let height = harness.list.height();
    assert_eq!(
        reloaded.list.get_quorum(QuorumType::Obligations, height, false, None),
        harness.list.get_quorum(QuorumType::Obligations, height, false, None)
    );
}

#[test]
fn test_load_without_stored_data() {
    let harness = ChainHarness::new();
    harness.register(1);
    assert!(!harness.list.load(harness.chain.current_height()).unwrap());
}

// =============================================================================
// REWARDS
// =============================================================================

/// Single node at height 100 whose reward splits unevenly three ways.
fn leader_with_three_contributors() -> RegistryState {
    let operator = operator_address(1);
    let contributors = [
        (operator, 50 * COIN),
        (operator_address(2), 30 * COIN),
        (operator_address(3), 20 * COIN),
    ]
    .into_iter()
    .map(|(address, amount)| Contributor {
        amount,
        ..Contributor::new(amount, address)
    })
    .collect();
    let info = ServiceNodeInfo {
        registration_hf_version: HardFork::Hf18,
        active_since_height: 1,
        staking_requirement: 100 * COIN,
        total_contributed: 100 * COIN,
        total_reserved: 100 * COIN,
        portions_for_operator: STAKING_PORTIONS / 20,
        operator_address: operator,
        contributors,
        ..ServiceNodeInfo::default()
    };
    let mut state = RegistryState::new(100);
    state.service_nodes_infos.insert(node_pubkey(1), Arc::new(info));
    state
}

#[test]
fn test_reward_conservation() {
    let crypto = test_crypto();
    let net = fakechain();
    let chain = InMemoryBlockchain::new();
    let state = leader_with_three_contributors();
    let leader = state.get_block_leader().key;
    let total = 16_500_000_001;

    let payout = service_node_payout_portions(&leader, state.info(&leader).unwrap());
    let split = distribute_reward_by_portions(&payout.payouts, total, true);
    assert_eq!(split.iter().sum::<u64>(), total);

    let coinbase = |amounts: &[u64]| Block {
        height: 101,
        major_version: HardFork::Hf18,
        miner_tx: Transaction {
            outputs: payout
                .payouts
                .iter()
                .zip(amounts)
                .enumerate()
                .map(|(index, (entry, &amount))| TxOutput {
                    key: deterministic_output_key(&crypto, &entry.address, 101, index).unwrap(),
                    amount,
                    masked_amount: 0,
                })
                .collect(),
            extra: vec![TxExtraField::ServiceNodeWinner(leader)],
            ..Transaction::default()
        },
        ..Block::default()
    };
    let parts = BlockRewardParts {
        base_miner: 0,
        miner_fee: 0,
        service_node_total: total,
    };

    let block = coinbase(&split);
    let info = MinerTxInfo {
        block: &block,
        reward_parts: parts,
        batched_payments: &[],
    };
    assert!(validate_miner_tx(&crypto, &net, &chain, &state, &info).is_ok());

    // One unit of slack per output, no more.
    let mut skewed = split.clone();
    skewed[1] -= 1;
    let block = coinbase(&skewed);
    let info = MinerTxInfo {
        block: &block,
        ..info
    };
    assert!(validate_miner_tx(&crypto, &net, &chain, &state, &info).is_ok());

    skewed[1] -= 1;
    let block = coinbase(&skewed);
    let info = MinerTxInfo {
        block: &block,
        ..info
    };
    assert!(matches!(
        validate_miner_tx(&crypto, &net, &chain, &state, &info),
        Err(BlockVerificationError::RewardAmount { .. })
    ));
}

#[test]
fn test_service_checks_miner_tx_winner() {
    let harness = ChainHarness::new();
    harness.register(1);
    harness.register(2);
    let leader = harness.list.get_block_leader().key;

    let mut block = harness.next_block(&[]);
    block.miner_tx.extra = vec![TxExtraField::ServiceNodeWinner(leader)];
    let info = MinerTxInfo {
        block: &block,
        reward_parts: BlockRewardParts::default(),
        batched_payments: &[],
    };
    assert!(harness.list.validate_miner_tx(&info).is_ok());

    let other = if leader == node_pubkey(1) {
        node_pubkey(2)
    } else {
        node_pubkey(1)
    };
    let mut wrong_block = block.clone();
    wrong_block.miner_tx.extra = vec![TxExtraField::ServiceNodeWinner(other)];
    let info = MinerTxInfo {
        block: &wrong_block,
        ..info
    };
    assert!(matches!(
        harness.list.validate_miner_tx(&info),
        Err(BlockVerificationError::WrongWinner { .. })
    ));
    assert_eq!(harness.list.height(), FIRST_SN_HEIGHT + 1);
}
