//! # Service Node Benchmarks
//!
//! Hot paths run once per block by every node:
//!
//! | Path | Runs |
//! |------|------|
//! | Obligations/checkpoint/blink quorums | every block |
//! | Pulse quorum | every block, per round |
//! | Block transition | every block, plus every block of a rescan |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qc_18_service_nodes::adapters::InMemoryBlockchain;
use qc_18_service_nodes::config::{NetworkConfig, NetworkType};
use qc_18_service_nodes::domain::history::{HistoryStore, HistoryView};
use qc_18_service_nodes::domain::quorum_gen::{generate_other_quorums, generate_pulse_quorum};
use qc_18_service_nodes::domain::transitions::TransitionContext;
use qc_18_service_nodes::test_utils::{active_nodes, entropy_for, test_crypto};
use qc_18_service_nodes::RegistryState;
use shared_types::{Block, HardFork, TxExtraField};
use std::time::Duration;

const NODE_COUNTS: [u8; 3] = [50, 150, 250];

fn registry(height: u64, count: u8) -> RegistryState {
    let mut state = RegistryState::new(height);
    for (key, info) in active_nodes(count) {
        state.service_nodes_infos.insert(key, info);
    }
    state.block_hash = [7; 32];
    state
}

fn bench_other_quorums(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-other-quorums");
    group.measurement_time(Duration::from_secs(5));

    for count in NODE_COUNTS {
        // Height chosen so checkpoint and blink quorums are generated too.
        let state = registry(3_605, count);
        let active = state.active_service_nodes_infos();
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &state, |b, state| {
            b.iter(|| {
                let mut state = state.clone();
                generate_other_quorums(&mut state, &active, NetworkType::Mainnet, HardFork::Hf19)
                    .ok();
                black_box(state.quorums)
            })
        });
    }
    group.finish();
}

fn bench_pulse_quorum(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-pulse-quorum");

    for count in NODE_COUNTS {
        let nodes = active_nodes(count);
        let leader = nodes[0].0;
        let entropy = entropy_for(3);
        group.bench_with_input(BenchmarkId::from_parameter(count), &nodes, |b, nodes| {
            b.iter(|| {
                black_box(generate_pulse_quorum(
                    12,
                    &leader,
                    HardFork::Hf19,
                    nodes,
                    &entropy,
                    black_box(0),
                ))
            })
        });
    }
    group.finish();
}

fn bench_block_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-block-transition");
    let net = NetworkConfig::for_network(NetworkType::Fakechain);
    let crypto = test_crypto();
    let chain = InMemoryBlockchain::new();
    let store = HistoryStore::new(0);

    for count in NODE_COUNTS {
        let state = registry(999, count);
        let mut block = Block {
            height: 1_000,
            hash: [9; 32],
            major_version: HardFork::Hf19,
            ..Block::default()
        };
        block
            .miner_tx
            .extra
            .push(TxExtraField::ServiceNodeWinner(state.get_block_leader().key));

        group.bench_with_input(BenchmarkId::from_parameter(count), &state, |b, state| {
            let ctx = TransitionContext {
                net: &net,
                crypto: &crypto,
                blockchain: &chain,
                history: HistoryView::new(state, &store),
                my_key: None,
            };
            b.iter(|| {
                let mut next = state.clone();
                next.update_from_block(&ctx, &block, &[]).ok();
                black_box(next)
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_other_quorums,
    bench_pulse_quorum,
    bench_block_transition
);
criterion_main!(benches);
