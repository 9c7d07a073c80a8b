//! Driven Ports (SPI - Outbound Dependencies)
//!
//! Everything the registry needs from the rest of the node: chain reads, the
//! crypto primitives, a key/value store for snapshots and proofs, a sink for
//! returned bridge stakes, and the wall clock.

use crate::error::PersistenceError;
use shared_types::{
    Block, EthAddress, Hash, KeyImage, PublicKey, SecretKey, Signature, Transaction, TxOutput,
    X25519PublicKey,
};

/// Shared secret derived from a view key and a transaction key.
pub type KeyDerivation = [u8; 32];

/// Read access to the canonical (and cached alt) chain.
pub trait BlockchainReader: Send + Sync {
    /// Number of blocks in the canonical chain (top height + 1).
    fn current_height(&self) -> u64;

    fn block_by_height(&self, height: u64) -> Option<Block>;

    /// Canonical or alt block by hash.
    fn block_by_hash(&self, hash: &Hash) -> Option<Block>;

    fn transaction(&self, hash: &Hash) -> Option<Transaction>;

    /// Non-miner transactions of `block`, in block order.
    fn block_transactions(&self, block: &Block) -> Vec<Transaction> {
        block
            .tx_hashes
            .iter()
            .filter_map(|hash| self.transaction(hash))
            .collect()
    }
}

/// Cryptographic collaborator. All calls are opaque verify/derive operations.
pub trait CryptoProvider: Send + Sync {
    /// Chain hash used for signed messages.
    fn fast_hash(&self, data: &[u8]) -> Hash;

    /// Public key is a valid curve point.
    fn check_key(&self, key: &PublicKey) -> bool;

    /// Detached signature over a 32-byte hash.
    fn verify_signature(&self, hash: &Hash, key: &PublicKey, signature: &Signature) -> bool;

    /// Proof that the holder of `key` can produce `key_image`.
    fn verify_key_image_signature(
        &self,
        key_image: &KeyImage,
        key: &PublicKey,
        signature: &Signature,
    ) -> bool;

    fn generate_key_derivation(
        &self,
        public_key: &PublicKey,
        secret_key: &SecretKey,
    ) -> Option<KeyDerivation>;

    /// One-time output key for output `index` paid to `base`.
    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        index: usize,
        base: &PublicKey,
    ) -> Option<PublicKey>;

    /// Decode the hidden amount of output `index`.
    fn decode_amount(
        &self,
        derivation: &KeyDerivation,
        index: usize,
        output: &TxOutput,
    ) -> Option<u64>;

    /// Keypair miners use to pay service nodes at `height`.
    fn deterministic_keypair_from_height(&self, height: u64) -> (PublicKey, SecretKey);

    fn ed25519_to_x25519(&self, key: &PublicKey) -> Option<X25519PublicKey>;
}

/// Key/value store for registry blobs and uptime proofs.
///
/// Production: the chain database. Testing: `InMemoryDataStore`.
pub trait ServiceNodeDataStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Either all operations apply, or none do.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), PersistenceError>;

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, PersistenceError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Storage key layout.
pub struct KeyPrefix;

impl KeyPrefix {
    pub const LONG_TERM_DATA: &'static [u8] = b"sn:data:long";
    pub const SHORT_TERM_DATA: &'static [u8] = b"sn:data:short";
    pub const PROOF: &'static [u8] = b"sn:proof:";

    pub fn proof_key(pubkey: &PublicKey) -> Vec<u8> {
        let mut key = Vec::with_capacity(Self::PROOF.len() + 32);
        key.extend_from_slice(Self::PROOF);
        key.extend_from_slice(pubkey);
        key
    }

    pub fn pubkey_from_proof_key(key: &[u8]) -> Option<PublicKey> {
        key.strip_prefix(Self::PROOF)?.try_into().ok()
    }
}

/// One contributor's share of a stake returned by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnedStake {
    pub eth_address: EthAddress,
    pub amount: u64,
}

/// Stakes released by an exited bridge node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedStakes {
    pub service_node_pubkey: PublicKey,
    pub height: u64,
    /// Blocks to hold the payout back
    pub delay_blocks: u64,
    pub stakes: Vec<ReturnedStake>,
}

/// Receives returned bridge stakes.
pub trait StakeReturnLedger: Send + Sync {
    fn return_staked_amount(&self, returned: ReturnedStakes);
}

/// Wall clock in unix seconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}
