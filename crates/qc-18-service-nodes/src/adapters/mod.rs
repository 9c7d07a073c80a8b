//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implementations of the outbound ports. The crypto provider is the
//! production one; the rest are in-memory versions for tests and tooling.

mod chain;
mod crypto;
mod ledger;
mod store;
mod time;

pub use chain::InMemoryBlockchain;
pub use crypto::Ed25519CryptoProvider;
pub use ledger::InMemoryStakeLedger;
pub use store::InMemoryDataStore;
pub use time::{ManualClock, SystemTimeSource};
