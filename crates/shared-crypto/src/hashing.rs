//! # Hashing
//!
//! Two hash families are used by the chain:
//!
//! - **Keccak-256** (`fast_hash`): the chain hash. Registration messages,
//!   vote payloads, uptime proofs and Pulse entropy are all hashed with it,
//!   so its output is consensus-critical.
//! - **BLAKE3**: key derivation and deterministic seed expansion.

use blake3::Hasher;
use sha3::{Digest, Keccak256};

/// 256-bit digest.
pub type Hash = [u8; 32];

/// Keccak-256 of `data` (the chain's fast hash).
pub fn fast_hash(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 over the concatenation of `inputs`.
pub fn fast_hash_many(inputs: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for input in inputs {
        hasher.update(input);
    }
    hasher.finalize().into()
}

/// Stateful BLAKE3 hasher.
pub struct Blake3Hasher {
    inner: Hasher,
}

impl Blake3Hasher {
    /// Create new hasher.
    pub fn new() -> Self {
        Self {
            inner: Hasher::new(),
        }
    }

    /// Create a hasher in key-derivation mode for `context`.
    pub fn new_derive_key(context: &str) -> Self {
        Self {
            inner: Hasher::new_derive_key(context),
        }
    }

    /// Update with data.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Finalize and return hash.
    pub fn finalize(&self) -> Hash {
        *self.inner.finalize().as_bytes()
    }
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash data with BLAKE3 (one-shot).
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Derive a 32-byte key from `context` and the concatenated key material.
pub fn blake3_derive_key(context: &str, key_material: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake3Hasher::new_derive_key(context);
    for part in key_material {
        hasher.update(part);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_hash_is_keccak() {
        // Keccak-256 of the empty string (not SHA3-256).
        let empty = fast_hash(b"");
        assert_eq!(
            empty[..4],
            [0xc5, 0xd2, 0x46, 0x01],
            "fast_hash must use original Keccak padding"
        );
    }

    #[test]
    fn test_fast_hash_many_matches_concatenation() {
        let joined = fast_hash(b"hello world");
        let parts = fast_hash_many(&[b"hello ", b"world"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_derive_key_separates_contexts() {
        let a = blake3_derive_key("context a", &[b"material"]);
        let b = blake3_derive_key("context b", &[b"material"]);
        assert_ne!(a, b);
        assert_eq!(a, blake3_derive_key("context a", &[b"mat", b"erial"]));
    }

    #[test]
    fn test_blake3_deterministic() {
        assert_eq!(blake3_hash(b"test"), blake3_hash(b"test"));
        assert_ne!(blake3_hash(b"input1"), blake3_hash(b"input2"));
    }
}
