//! Domain module for the Service Node List subsystem
//!
//! ## Core Modules
//! - info: Service node entries, contributors and locked stakes
//! - registry: Registry snapshot and queries against it
//! - registration: Registration and stake validation
//! - transitions: Block-by-block state transition engine
//! - quorum / quorum_gen / rng: Deterministic committee selection
//! - history: Short-term history, long-term archive and old quorums
//! - verifier / rewards: Block, vote and miner transaction verification
//!
//! ## Supporting Modules
//! - bridge: External-chain registration and exit handlers
//! - swarm: Swarm assignment
//! - proofs: Uptime proofs, participation and the x25519 map
//! - persistence: Versioned registry blobs
//! - rules: Consensus constants

pub mod bridge;
pub mod history;
pub mod info;
pub mod persistence;
pub mod proofs;
pub mod quorum;
pub mod quorum_gen;
pub mod registration;
pub mod registry;
pub mod rewards;
pub mod rng;
pub mod rules;
pub mod swarm;
pub mod transitions;
pub mod verifier;

// Core exports
pub use history::{HistoryStore, HistoryView, QuorumsByHeight, Rewind};
pub use info::{Contributor, InfoVersion, LockedContribution, ServiceNodeInfo};
pub use quorum::{Quorum, QuorumGroup, QuorumManager, QuorumType};
pub use registration::{RegistrationDetails, StakingComponents};
pub use registry::{BlockLeader, InfoPtr, KeyImageBlacklistEntry, RegistryState};
pub use transitions::{BlockOutcome, TransitionContext};
pub use verifier::{verify_block, VerifyContext};

// Supporting exports
pub use proofs::{ProofEndpoints, ProofInfo, ProofRejection, UptimeProof, X25519Map};
pub use rewards::{BatchPayment, BlockRewardParts, MinerTxInfo, Payout, PayoutEntry};
pub use rng::Mt19937_64;
