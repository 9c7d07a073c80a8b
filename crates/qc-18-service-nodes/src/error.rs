//! Error types for the Service Node List subsystem

use shared_types::Hash;
use thiserror::Error;

/// Crate-wide service node errors
#[derive(Debug, Error)]
pub enum ServiceNodeError {
    /// Registration or stake transaction failed validation
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Block failed consensus verification against the local registry
    #[error(transparent)]
    BlockVerification(#[from] BlockVerificationError),

    /// Snapshot serialization or storage failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Block height does not follow the registry head
    #[error("Non-sequential block: registry at height {expected}, block at height {actual}")]
    NonSequentialBlock { expected: u64, actual: u64 },

    /// Block referenced by the chain could not be read back
    #[error("Block at height {height} is not available from the chain")]
    MissingBlock { height: u64 },

    /// Alt block arrived with no known parent state
    #[error("Received alt block {block_hash:?} but couldn't find parent state in historical state")]
    MissingAltParent { block_hash: Hash },

    /// Requested BLS key is not registered
    #[error("No service node is registered with BLS public key {bls_pubkey}")]
    UnknownBlsKey { bls_pubkey: String },

    /// Internal invariant broken; continuing would risk consensus divergence
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },
}

/// Result type for service node operations
pub type ServiceNodeResult<T> = Result<T, ServiceNodeError>;

/// Structured "invalid registration" condition
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid registration: {reason}")]
pub struct RegistrationError {
    pub reason: String,
}

impl RegistrationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Hard consensus mismatches found while verifying a block
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockVerificationError {
    /// Miner tx names a different reward winner than the queue leader
    #[error("Service node reward winner is incorrect! Expected {expected}, block {height} hf{hf} has {actual}")]
    WrongWinner {
        expected: String,
        height: u64,
        hf: u8,
        actual: String,
    },

    /// Pulse block arrived but the registry cannot form a quorum
    #[error("Pulse block received but Pulse has insufficient nodes for quorum, block hash {block_hash}, height {height}")]
    InsufficientPulseNodes { block_hash: String, height: u64 },

    /// Round 0 must be produced by the leader
    #[error("The block producer in pulse round 0 should be the same node as the block leader: {leader}, actual producer: {producer}")]
    Round0ProducerMismatch { leader: String, producer: String },

    /// Pulse producer is not a registered node
    #[error("The pulse block producer for round {round} is not currently a Service Node: {producer}")]
    UnknownProducer { round: u8, producer: String },

    /// Miner tx output count differs from the expected payee set
    #[error("Expected {block_kind} block, the miner TX specifies a different amount of outputs vs the expected: {expected}, miner tx outputs: {actual}")]
    OutputCount {
        block_kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Miner reward must be zero once Pulse is active
    #[error("Miner reward is incorrect expected 0 reward, block specified {amount}")]
    NonZeroMinerReward { amount: u64 },

    /// Output index referenced by a payout does not exist
    #[error("Output Index: {index}, indexes out of bounds in vout array with size: {size}")]
    OutputIndexOutOfBounds { index: usize, size: usize },

    /// Service node payout amount mismatch
    #[error("Service node reward amount incorrect. Should be {expected}, is: {actual}")]
    RewardAmount { expected: u64, actual: u64 },

    /// Output key is not the deterministic derivation for the payee
    #[error("Invalid service node reward at output: {index}, output key, specifies wrong key")]
    RewardKey { index: usize },

    /// Batched payment does not match its miner tx output
    #[error("Batched reward payout invalid at output {index}: {reason}")]
    BatchedPayment { index: usize, reason: String },

    /// Batched payment totals disagree
    #[error("Total service node reward amount incorrect. Should be {expected}, is: {actual}")]
    BatchedTotal { expected: u64, actual: u64 },

    /// No checkpoint quorum is stored for the checkpoint height
    #[error("Failed to get testing quorum checkpoint for {block_kind} {block_hash}")]
    MissingCheckpointQuorum {
        block_kind: &'static str,
        block_hash: String,
    },

    /// Checkpoint signatures did not verify
    #[error("Service node checkpoint failed verification for {block_kind} {block_hash}")]
    CheckpointVerification {
        block_kind: &'static str,
        block_hash: String,
    },

    /// Pulse or miner components are malformed
    #[error("Failed to verify block components for incoming {block_kind} at height {height}: {reason}")]
    BlockComponents {
        block_kind: &'static str,
        height: u64,
        reason: String,
    },
}

/// Persistence errors (in-memory state stays authoritative)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Serialization failed
    #[error("Failed to serialize {what}: {reason}")]
    Serialization { what: &'static str, reason: String },

    /// Deserialization failed
    #[error("Failed to deserialize {what}: {reason}")]
    Deserialization { what: &'static str, reason: String },

    /// Stored blob is structurally inconsistent
    #[error("Stored service node data is corrupt: {reason}")]
    Corrupt { reason: String },

    /// Backend write or read failed
    #[error("Storage error: {reason}")]
    Storage { reason: String },
}
