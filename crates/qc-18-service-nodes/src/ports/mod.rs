//! Ports module for the Service Node List subsystem

pub mod inbound;
pub mod outbound;

pub use inbound::{ProofAcceptance, ServiceNodeApi};
pub use outbound::{
    BatchOperation, BlockchainReader, CryptoProvider, KeyPrefix, ReturnedStake, ReturnedStakes,
    ServiceNodeDataStore, StakeReturnLedger, TimeSource,
};
