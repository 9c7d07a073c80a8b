//! # Concurrent Access
//!
//! Readers on other threads must only ever see whole blocks applied.

use super::harness::{ChainHarness, FIRST_SN_HEIGHT};
use qc_18_service_nodes::test_utils::node_pubkey;
use qc_18_service_nodes::{QuorumType, ServiceNodeApi};
use std::sync::Arc;

const BLOCKS: u64 = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_monotonic_heights_while_blocks_apply() {
    let harness = Arc::new(ChainHarness::new());
    harness.register(1);
    let key = node_pubkey(1);

    let writer = {
        let harness = Arc::clone(&harness);
        tokio::task::spawn_blocking(move || {
            for _ in 0..BLOCKS {
                harness.mine(Vec::new());
            }
            harness.list.height()
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::task::spawn_blocking(move || {
                let mut last_height = 0;
                for _ in 0..500 {
                    let state = harness.list.state();
                    assert!(state.height >= last_height);
                    assert!(state.is_service_node(&key, true));
                    assert!(state.quorums.get(QuorumType::Obligations).is_some());
                    last_height = state.height;
                }
                last_height
            })
        })
        .collect();

    let final_height = writer.await.unwrap();
    for reader in readers {
        assert!(reader.await.unwrap() <= final_height);
    }
    assert_eq!(final_height, FIRST_SN_HEIGHT + BLOCKS);
    assert!(harness.list.is_service_node(&key, true));
}
