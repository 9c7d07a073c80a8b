//! Driving Ports (API - Inbound)
//!
//! What chain validation, networking and mining call into. Every method is
//! synchronous; callers on an async runtime should hop to a blocking thread.

use crate::domain::proofs::{ProofEndpoints, ProofRejection, UptimeProof};
use crate::domain::quorum::{Quorum, QuorumType};
use crate::domain::rewards::MinerTxInfo;
use crate::error::{BlockVerificationError, ServiceNodeResult};
use shared_types::{Block, Checkpoint, PublicKey, Transaction, X25519PublicKey};
use std::sync::Arc;

/// Result of accepting an uptime proof
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProofAcceptance {
    /// The proof was our own, echoed back by the network
    pub my_uptime_proof_confirmation: bool,
    /// Set when the node's x25519 key is new or changed
    pub new_x25519: Option<X25519PublicKey>,
}

/// Primary Service Node List API
///
/// The registry follows the canonical chain block by block. Blocks are
/// applied all-or-nothing: if the transition or the verification fails, the
/// published registry is left untouched.
pub trait ServiceNodeApi: Send + Sync {
    /// Load stored state (or rebuild it) and catch up with the chain.
    fn init(&self) -> ServiceNodeResult<()>;

    /// Apply and verify a canonical block
    ///
    /// # Arguments
    /// * `block` - The block, already accepted by chain validation
    /// * `txs` - Its non-miner transactions in block order
    /// * `checkpoint` - Checkpoint carried with the block, if any
    fn block_add(
        &self,
        block: &Block,
        txs: &[Transaction],
        checkpoint: Option<&Checkpoint>,
    ) -> ServiceNodeResult<()>;

    /// Derive and verify the state an alt-chain block would produce.
    /// Never touches the canonical registry.
    fn alt_block_add(
        &self,
        block: &Block,
        txs: &[Transaction],
        checkpoint: Option<&Checkpoint>,
    ) -> ServiceNodeResult<()>;

    /// Roll back after the chain dropped every block from `height` up.
    fn blockchain_detached(&self, height: u64) -> ServiceNodeResult<()>;

    /// Quorum of `quorum_type` for `height`
    ///
    /// Alt-chain quorums for the same height are appended to `alt_quorums`
    /// when it is provided.
    fn get_quorum(
        &self,
        quorum_type: QuorumType,
        height: u64,
        include_old: bool,
        alt_quorums: Option<&mut Vec<Arc<Quorum>>>,
    ) -> Option<Arc<Quorum>>;

    fn is_service_node(&self, pubkey: &PublicKey, require_active: bool) -> bool;

    /// Check a block's miner transaction against the current registry
    fn validate_miner_tx(&self, info: &MinerTxInfo<'_>) -> Result<(), BlockVerificationError>;

    /// Validate and record a proof relayed by the network
    fn handle_uptime_proof(&self, proof: UptimeProof) -> Result<ProofAcceptance, ProofRejection>;

    /// Sign a proof for this node; `None` when no keys are configured
    fn generate_uptime_proof(&self, endpoints: &ProofEndpoints) -> Option<UptimeProof>;

    /// Write both registry blobs
    fn store(&self) -> ServiceNodeResult<()>;

    /// Replace the registry with the stored blobs. Returns false when there
    /// is nothing usable to load.
    fn load(&self, current_height: u64) -> ServiceNodeResult<bool>;
}
