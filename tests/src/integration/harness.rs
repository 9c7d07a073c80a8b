//! # Chain Harness
//!
//! In-memory chain plus a `ServiceNodeList` following it. Blocks below
//! `FIRST_SN_HEIGHT` predate service nodes; everything from there on runs
//! under HF19 on fakechain rules.

use qc_18_service_nodes::adapters::{
    Ed25519CryptoProvider, InMemoryBlockchain, InMemoryDataStore, InMemoryStakeLedger,
    ManualClock,
};
use qc_18_service_nodes::config::{HardForkActivation, NetworkConfig, NetworkType, COIN};
use qc_18_service_nodes::domain::rules::TARGET_BLOCK_TIME;
use qc_18_service_nodes::test_utils::{active_nodes, operator_address, stake_tx, test_crypto};
use qc_18_service_nodes::{
    BlockchainReader, RegistryState, ServiceNodeApi, ServiceNodeConfig, ServiceNodeList,
};
use shared_crypto::fast_hash;
use shared_types::{Block, HardFork, Hash, Transaction};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const FIRST_SN_HEIGHT: u64 = 10;

pub type TestList = ServiceNodeList<
    InMemoryBlockchain,
    Ed25519CryptoProvider,
    InMemoryDataStore,
    InMemoryStakeLedger,
    ManualClock,
>;

/// Route subsystem logs to the test writer. Controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> ServiceNodeConfig {
    ServiceNodeConfig::for_network(
        NetworkType::Fakechain,
        vec![
            HardForkActivation::new(HardFork::Hf7, 0),
            HardForkActivation::new(HardFork::Hf19, FIRST_SN_HEIGHT),
        ],
    )
}

pub fn fakechain() -> NetworkConfig {
    NetworkConfig::for_network(NetworkType::Fakechain)
}

/// Block `height` on fork `fork`. Different forks give different hashes.
pub fn make_block(height: u64, prev_hash: Hash, fork: u8, txs: &[Transaction]) -> Block {
    let mut data = height.to_le_bytes().to_vec();
    data.push(fork);
    Block {
        height,
        hash: fast_hash(&data),
        prev_hash,
        major_version: config().hard_fork_at(height),
        timestamp: GENESIS_TIME + height * TARGET_BLOCK_TIME,
        tx_hashes: txs.iter().map(|tx| tx.hash).collect(),
        ..Block::default()
    }
}

/// Registry at `height` holding `count` active nodes.
pub fn registry_with_nodes(height: u64, count: u8) -> RegistryState {
    let mut state = RegistryState::new(height);
    for (key, info) in active_nodes(count) {
        state.service_nodes_infos.insert(key, info);
    }
    state
}

pub struct ChainHarness {
    pub chain: Arc<InMemoryBlockchain>,
    pub data_store: Arc<InMemoryDataStore>,
    pub ledger: Arc<InMemoryStakeLedger>,
    pub clock: Arc<ManualClock>,
    pub list: Arc<TestList>,
}

impl ChainHarness {
    /// Chain holding the pre-service-node blocks, with the list initialised.
    pub fn new() -> Self {
        init_tracing();
        let chain = Arc::new(InMemoryBlockchain::new());
        let mut prev = [0u8; 32];
        for height in 0..FIRST_SN_HEIGHT {
            let block = make_block(height, prev, 0, &[]);
            prev = block.hash;
            chain.add_block(block, Vec::new());
        }
        let harness = Self::on_chain(chain, Arc::new(InMemoryDataStore::new()));
        harness.list.init().unwrap();
        harness
    }

    /// A second list over an existing chain and store. Not initialised.
    pub fn on_chain(chain: Arc<InMemoryBlockchain>, data_store: Arc<InMemoryDataStore>) -> Self {
        let clock = Arc::new(ManualClock::new(GENESIS_TIME));
        let ledger = Arc::new(InMemoryStakeLedger::new());
        let list = Arc::new(ServiceNodeList::new(
            config(),
            Arc::clone(&chain),
            Arc::new(test_crypto()),
            Arc::clone(&data_store),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        ));
        Self {
            chain,
            data_store,
            ledger,
            clock,
            list,
        }
    }

    pub fn next_block(&self, txs: &[Transaction]) -> Block {
        let height = self.chain.current_height();
        let prev = self.chain.block_by_height(height - 1).unwrap().hash;
        make_block(height, prev, 0, txs)
    }

    /// Append a block to the chain and feed it to the list.
    pub fn mine(&self, txs: Vec<Transaction>) -> Block {
        let block = self.next_block(&txs);
        self.chain.add_block(block.clone(), txs.clone());
        self.list.block_add(&block, &txs, None).unwrap();
        block
    }

    /// Register node `seed` with a full operator stake.
    pub fn register(&self, seed: u8) -> Block {
        self.mine(vec![stake_tx(
            &test_crypto(),
            seed,
            HardFork::Hf19,
            vec![(operator_address(seed), 100 * COIN)],
            100 * COIN,
        )])
    }
}
