//! # qc-18-service-nodes
//!
//! Service Node List: the staked node registry every full node derives from
//! the chain, and the deterministic quorums built on top of it.
//!
//! ## Overview
//!
//! This subsystem provides:
//! - **Registry**: Registrations, contributions, unlocks and state changes, block by block
//! - **Quorums**: Obligations, checkpointing, blink and Pulse committees from block entropy
//! - **Pulse**: Block leader selection, validator signatures and miner transaction rewards
//! - **History**: Short-term states, a long-term archive and detach/alt-chain support
//! - **Uptime Proofs**: Proof validation, participation tracking and the x25519 map
//!
//! ## Architecture
//!
//! ```text
//! Chain validation ──block_add / alt_block_add / blockchain_detached──→ Service Node List
//!                                                                        │
//!                                          ┌─────────────────────────────┤
//!                                          │                             │
//!                            RegistryState (head, copy-on-write)   HistoryStore
//!                                          │                   (short-term, archive, alt)
//!                                          │
//!                  get_quorum / validate_miner_tx ←── Mining, Pulse, Checkpointing
//!
//! Network ──uptime proofs──→ ProofInfo + X25519Map ──remote_lookup──→ Quorumnet
//! ```
//!
//! Every block is applied to a copy of the head and verified before the copy
//! is published, so a rejected block never changes what readers see.
//!
//! ## Example
//!
//! ```rust,ignore
//! use qc_18_service_nodes::{ServiceNodeApi, ServiceNodeConfig, ServiceNodeList};
//!
//! let list = ServiceNodeList::new(
//!     ServiceNodeConfig::default(),
//!     blockchain,
//!     crypto,
//!     data_store,
//!     ledger,
//!     clock,
//! );
//! list.init()?;
//!
//! // Follow the chain
//! list.block_add(&block, &txs, checkpoint.as_ref())?;
//!
//! // Look up the Pulse quorum for the next block
//! let quorum = list.get_quorum(QuorumType::Pulse, height, false, None);
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{HardForkActivation, NetworkConfig, NetworkType, ServiceNodeConfig, COIN};
pub use domain::{
    BlockLeader, BlockOutcome, HistoryStore, InfoPtr, KeyImageBlacklistEntry, LockedContribution,
    MinerTxInfo, ProofEndpoints, ProofInfo, ProofRejection, Quorum, QuorumGroup, QuorumType,
    RegistryState, ServiceNodeInfo, UptimeProof,
};
pub use error::{
    BlockVerificationError, PersistenceError, RegistrationError, ServiceNodeError,
    ServiceNodeResult,
};
pub use ports::inbound::{ProofAcceptance, ServiceNodeApi};
pub use ports::outbound::{
    BatchOperation, BlockchainReader, CryptoProvider, KeyPrefix, ServiceNodeDataStore,
    StakeReturnLedger, TimeSource,
};
pub use service::{PeerService, ServiceNodeList};
