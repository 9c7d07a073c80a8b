//! # Shared Crypto
//!
//! Cryptographic primitives used by the service node subsystem.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | Keccak-256 | Chain hash for signed messages and entropy |
//! | `hashing` | BLAKE3 | Key derivation, seed expansion |
//! | `signatures` | Ed25519 | Node identity, votes, uptime proofs |
//! | `signatures` | x25519 | Transport key derived from the Ed25519 key |
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency
//! - **Keccak-256**: Original Keccak padding, matching the chain's hash

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod signatures;

pub use errors::CryptoError;
pub use hashing::{blake3_derive_key, blake3_hash, fast_hash, fast_hash_many, Blake3Hasher};
pub use signatures::{
    is_valid_public_key, verify_detached, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature,
};
