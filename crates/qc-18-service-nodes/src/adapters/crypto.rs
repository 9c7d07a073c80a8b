//! Ed25519 Crypto Adapter
//!
//! Implements `CryptoProvider` on top of `shared-crypto`. Output keys are
//! one-time Ed25519 keys seeded from the shared derivation, so whoever knows
//! the derivation can also produce the key-image proof for that output.

use crate::ports::outbound::{CryptoProvider, KeyDerivation};
use shared_crypto::{
    blake3_derive_key, fast_hash, is_valid_public_key, verify_detached, Blake3Hasher,
    Ed25519KeyPair, Ed25519PublicKey,
};
use shared_types::{Hash, KeyImage, PublicKey, SecretKey, Signature, TxOutput, X25519PublicKey};

const DERIVATION_CONTEXT: &str = "qc-18 service-node stake derivation v1";
const DETERMINISTIC_KEY_CONTEXT: &str = "qc-18 service-node deterministic miner key v1";
const AMOUNT_MASK_DOMAIN: &[u8] = b"amount";

/// Production crypto provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519CryptoProvider;

impl Ed25519CryptoProvider {
    pub fn new() -> Self {
        Self
    }

    /// Keypair behind output `index` paid to `base`.
    pub fn output_keypair(
        &self,
        derivation: &KeyDerivation,
        index: usize,
        base: &PublicKey,
    ) -> Ed25519KeyPair {
        let mut hasher = Blake3Hasher::new();
        hasher
            .update(derivation)
            .update(&(index as u64).to_le_bytes())
            .update(base);
        Ed25519KeyPair::from_seed(hasher.finalize())
    }

    fn amount_mask(derivation: &KeyDerivation, index: usize) -> u64 {
        let mut hasher = Blake3Hasher::new();
        hasher
            .update(derivation)
            .update(&(index as u64).to_le_bytes())
            .update(AMOUNT_MASK_DOMAIN);
        let digest = hasher.finalize();
        let mut mask = [0u8; 8];
        mask.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(mask)
    }

    /// Hide `amount` for output `index`; the inverse of `decode_amount`.
    pub fn encode_amount(&self, derivation: &KeyDerivation, index: usize, amount: u64) -> u64 {
        amount ^ Self::amount_mask(derivation, index)
    }
}

impl CryptoProvider for Ed25519CryptoProvider {
    fn fast_hash(&self, data: &[u8]) -> Hash {
        fast_hash(data)
    }

    fn check_key(&self, key: &PublicKey) -> bool {
        is_valid_public_key(key)
    }

    fn verify_signature(&self, hash: &Hash, key: &PublicKey, signature: &Signature) -> bool {
        verify_detached(key, hash, signature)
    }

    fn verify_key_image_signature(
        &self,
        key_image: &KeyImage,
        key: &PublicKey,
        signature: &Signature,
    ) -> bool {
        verify_detached(key, key_image, signature)
    }

    fn generate_key_derivation(
        &self,
        public_key: &PublicKey,
        secret_key: &SecretKey,
    ) -> Option<KeyDerivation> {
        if !is_valid_public_key(public_key) {
            return None;
        }
        Some(blake3_derive_key(
            DERIVATION_CONTEXT,
            &[public_key.as_slice(), secret_key.as_slice()],
        ))
    }

    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        index: usize,
        base: &PublicKey,
    ) -> Option<PublicKey> {
        Some(*self.output_keypair(derivation, index, base).public_key().as_bytes())
    }

    fn decode_amount(
        &self,
        derivation: &KeyDerivation,
        index: usize,
        output: &TxOutput,
    ) -> Option<u64> {
        if output.amount != 0 {
            return Some(output.amount);
        }
        Some(output.masked_amount ^ Self::amount_mask(derivation, index))
    }

    fn deterministic_keypair_from_height(&self, height: u64) -> (PublicKey, SecretKey) {
        let seed = blake3_derive_key(DETERMINISTIC_KEY_CONTEXT, &[&height.to_le_bytes()]);
        let keypair = Ed25519KeyPair::from_seed(seed);
        (*keypair.public_key().as_bytes(), keypair.to_seed())
    }

    fn ed25519_to_x25519(&self, key: &PublicKey) -> Option<X25519PublicKey> {
        Ed25519PublicKey::from_bytes(*key).ok()?.to_x25519().ok()
    }
}
