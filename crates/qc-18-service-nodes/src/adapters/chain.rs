//! In-memory chain reader used by tests and tooling.

use crate::ports::outbound::BlockchainReader;
use parking_lot::RwLock;
use shared_types::{Block, Hash, Transaction};
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct ChainInner {
    canonical: BTreeMap<u64, Block>,
    by_hash: HashMap<Hash, Block>,
    transactions: HashMap<Hash, Transaction>,
}

/// Canonical blocks by height, plus any alt blocks seen, all addressable by hash.
#[derive(Default)]
pub struct InMemoryBlockchain {
    inner: RwLock<ChainInner>,
}

impl InMemoryBlockchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append (or replace) the canonical block at `block.height`.
    pub fn add_block(&self, block: Block, txs: Vec<Transaction>) {
        let mut inner = self.inner.write();
        for tx in txs {
            inner.transactions.insert(tx.hash, tx);
        }
        inner.by_hash.insert(block.hash, block.clone());
        inner.canonical.insert(block.height, block);
    }

    /// Make an alt block resolvable by hash without touching the canonical chain.
    pub fn add_alt_block(&self, block: Block, txs: Vec<Transaction>) {
        let mut inner = self.inner.write();
        for tx in txs {
            inner.transactions.insert(tx.hash, tx);
        }
        inner.by_hash.insert(block.hash, block);
    }

    /// Drop canonical blocks at and above `height`.
    pub fn pop_blocks_from(&self, height: u64) -> Vec<Block> {
        let mut inner = self.inner.write();
        let popped = inner.canonical.split_off(&height);
        for block in popped.values() {
            inner.by_hash.remove(&block.hash);
        }
        popped.into_values().collect()
    }
}

impl BlockchainReader for InMemoryBlockchain {
    fn current_height(&self) -> u64 {
        self.inner
            .read()
            .canonical
            .keys()
            .next_back()
            .map_or(0, |top| top + 1)
    }

    fn block_by_height(&self, height: u64) -> Option<Block> {
        self.inner.read().canonical.get(&height).cloned()
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.inner.read().by_hash.get(hash).cloned()
    }

    fn transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.inner.read().transactions.get(hash).cloned()
    }
}
