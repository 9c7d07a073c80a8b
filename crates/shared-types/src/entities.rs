//! # Core Chain Entities
//!
//! Defines the chain-level data the service node subsystem consumes: blocks,
//! transactions, the typed transaction extra fields, checkpoints and the
//! hardfork ladder that gates every consensus rule.
//!
//! ## Clusters
//!
//! - **Keys & Hashes**: `Hash`, `PublicKey`, `KeyImage`, `Signature`, `AccountAddress`
//! - **Chain**: `Block`, `PulseHeader`, `Transaction`, `TxOutput`, `Checkpoint`
//! - **Transaction Extra**: `TxExtraField` and its payload structs

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

// =============================================================================
// CLUSTER A: KEYS & HASHES
// =============================================================================

/// A 32-byte hash.
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// A 32-byte secret scalar (transaction secret key, view key, ...).
pub type SecretKey = [u8; 32];

/// A 32-byte spend-key fingerprint.
pub type KeyImage = [u8; 32];

/// A 32-byte Montgomery-form public key used for transport encryption.
pub type X25519PublicKey = [u8; 32];

/// A 20-byte Ethereum-style address.
pub type EthAddress = [u8; 20];

/// A 64-byte BLS public key (uncompressed affine point).
pub type BlsPublicKey = [u8; 64];

/// All-zero hash, used as the "unset" sentinel.
pub const NULL_HASH: Hash = [0u8; 32];

/// All-zero public key, used as the "unset" sentinel.
pub const NULL_PUBKEY: PublicKey = [0u8; 32];

/// A wallet address: public spend key plus public view key.
///
/// Ordering is byte-wise over (spend, view), which keeps every sorted
/// contributor list identical across platforms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct AccountAddress {
    /// Public spend key.
    pub spend_public_key: PublicKey,
    /// Public view key.
    pub view_public_key: PublicKey,
}

impl AccountAddress {
    /// Build an address from its two keys.
    pub fn new(spend_public_key: PublicKey, view_public_key: PublicKey) -> Self {
        Self {
            spend_public_key,
            view_public_key,
        }
    }

    /// True when both keys are zero.
    pub fn is_null(&self) -> bool {
        self.spend_public_key == NULL_PUBKEY && self.view_public_key == NULL_PUBKEY
    }

    /// Canonical 64-byte encoding (spend key then view key).
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.spend_public_key);
        out[32..].copy_from_slice(&self.view_public_key);
        out
    }
}

// =============================================================================
// CLUSTER B: HARDFORKS
// =============================================================================

/// Protocol version. Every consensus rule in the subsystem is gated on one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum HardFork {
    #[default]
    Hf7 = 7,
    Hf8 = 8,
    Hf9 = 9,
    Hf10 = 10,
    Hf11 = 11,
    Hf12 = 12,
    Hf13 = 13,
    Hf14 = 14,
    Hf15 = 15,
    Hf16 = 16,
    Hf17 = 17,
    Hf18 = 18,
    Hf19 = 19,
    Hf20 = 20,
    Hf21 = 21,
}

impl HardFork {
    /// Service nodes exist.
    pub const SERVICE_NODES: Self = Self::Hf9;
    /// Grace-period re-registration.
    pub const BULLETPROOFS: Self = Self::Hf10;
    /// Key-image locked stakes with explicit unlock requests.
    pub const INFINITE_STAKING: Self = Self::Hf11;
    /// Checkpointing quorums, decommission and recommission.
    pub const CHECKPOINTING: Self = Self::Hf12;
    /// Checkpoints are enforced; stricter state-change vote heights.
    pub const ENFORCE_CHECKPOINTS: Self = Self::Hf13;
    /// Blink quorums.
    pub const BLINK: Self = Self::Hf14;
    /// Pulse block production.
    pub const PULSE: Self = Self::Hf16;
    /// Amount-based registrations and batched rewards.
    pub const REWARD_BATCHING: Self = Self::Hf19;
    /// Transitional fork towards the external staking contract.
    pub const ETH_TRANSITION: Self = Self::Hf20;
    /// Registrations arrive through the external bridge.
    pub const ETH_BLS: Self = Self::Hf21;

    /// Every defined version, ascending.
    pub const ALL: [HardFork; 15] = [
        Self::Hf7,
        Self::Hf8,
        Self::Hf9,
        Self::Hf10,
        Self::Hf11,
        Self::Hf12,
        Self::Hf13,
        Self::Hf14,
        Self::Hf15,
        Self::Hf16,
        Self::Hf17,
        Self::Hf18,
        Self::Hf19,
        Self::Hf20,
        Self::Hf21,
    ];

    /// Numeric version.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a numeric version; `None` for anything outside the known ladder.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|hf| hf.as_u8() == value)
    }
}

// =============================================================================
// CLUSTER C: TRANSACTIONS
// =============================================================================

/// Transaction type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TxType {
    #[default]
    Standard,
    StateChange,
    KeyImageUnlock,
    Stake,
    EthNewServiceNode,
    EthLeaveRequest,
    EthExit,
    EthDeregister,
}

impl TxType {
    /// Highest transaction type the given hardfork accepts.
    ///
    /// Before the dedicated stake type existed, registrations and
    /// contributions travelled as standard transactions.
    pub fn staking_type_for_hf(hf: HardFork) -> TxType {
        if hf >= HardFork::Hf14 {
            TxType::Stake
        } else {
            TxType::Standard
        }
    }
}

/// One transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxOutput {
    /// One-time destination key.
    pub key: PublicKey,
    /// Clear amount (coinbase outputs); zero for confidential outputs.
    pub amount: u64,
    /// Masked amount of a confidential output, recoverable with the output's
    /// shared derivation.
    pub masked_amount: u64,
}

/// New state requested by a state-change transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum NewState {
    Deregister = 0,
    Decommission = 1,
    Recommission = 2,
    IpChangePenalty = 3,
}

impl NewState {
    /// Wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Registration payload attached to a staking transaction.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationExtra {
    /// Reserved contributor spend keys (operator first).
    pub public_spend_keys: Vec<PublicKey>,
    /// Reserved contributor view keys, parallel to `public_spend_keys`.
    pub public_view_keys: Vec<PublicKey>,
    /// Operator fee: portions before HF19, basis points after.
    pub fee: u64,
    /// Reserved amounts (portions or atomic units), parallel to the keys.
    pub amounts: Vec<u64>,
    /// Hardfork number (<= 255) or a portion-registration expiry timestamp.
    pub hf_or_expiration: u64,
    /// Service node key signature over the registration message.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// Proof that a staker can produce the future key image of a staked output.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyImageProof {
    pub key_image: KeyImage,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// Request to unlock a locked stake.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyImageUnlockExtra {
    pub key_image: KeyImage,
    pub nonce: u32,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// One validator vote embedded in a state-change transaction.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeVote {
    pub validator_index: u32,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// State-change payload voted on by an obligations quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeExtra {
    pub state: NewState,
    /// Height of the quorum that voted.
    pub block_height: u64,
    /// Index of the tested node in the quorum's worker list.
    pub service_node_index: u32,
    pub reason_consensus_all: u16,
    pub reason_consensus_any: u16,
    pub votes: Vec<StateChangeVote>,
}

/// A contributor entry of a bridge registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthContributor {
    pub address: EthAddress,
    pub amount: u64,
}

/// Registration relayed from the external staking contract.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthNewServiceNodeExtra {
    #[serde_as(as = "Bytes")]
    pub bls_pubkey: BlsPublicKey,
    pub eth_address: EthAddress,
    pub service_node_pubkey: PublicKey,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
    pub fee: u64,
    pub contributors: Vec<EthContributor>,
}

/// Leave request relayed from the external staking contract.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthLeaveRequestExtra {
    #[serde_as(as = "Bytes")]
    pub bls_pubkey: BlsPublicKey,
}

/// Stake exit relayed from the external staking contract.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthExitExtra {
    #[serde_as(as = "Bytes")]
    pub bls_pubkey: BlsPublicKey,
    pub eth_address: EthAddress,
    pub amount: u64,
}

/// Forced removal relayed from the external staking contract.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthDeregisterExtra {
    #[serde_as(as = "Bytes")]
    pub bls_pubkey: BlsPublicKey,
}

/// Typed transaction extra field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxExtraField {
    TxPublicKey(PublicKey),
    ServiceNodePubkey(PublicKey),
    ServiceNodeRegister(RegistrationExtra),
    ServiceNodeContributor(AccountAddress),
    TxSecretKey(SecretKey),
    KeyImageProofs(Vec<KeyImageProof>),
    KeyImageUnlock(KeyImageUnlockExtra),
    StateChange(StateChangeExtra),
    ServiceNodeWinner(PublicKey),
    EthNewServiceNode(EthNewServiceNodeExtra),
    EthLeaveRequest(EthLeaveRequestExtra),
    EthExit(EthExitExtra),
    EthDeregister(EthDeregisterExtra),
}

/// A transaction as seen by the service node subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transaction {
    pub hash: Hash,
    pub version: u8,
    pub tx_type: TxType,
    /// Transaction-wide unlock height (pre per-output unlock versions).
    pub unlock_time: u64,
    /// Per-output unlock heights (version 3 and later).
    pub output_unlock_times: Vec<u64>,
    pub outputs: Vec<TxOutput>,
    pub extra: Vec<TxExtraField>,
}

/// First transaction version carrying per-output unlock times.
pub const TX_VERSION_PER_OUTPUT_UNLOCK_TIMES: u8 = 3;

impl Transaction {
    /// Unlock height of output `index`, honouring the per-output layout.
    pub fn output_unlock_time(&self, index: usize) -> u64 {
        if self.version >= TX_VERSION_PER_OUTPUT_UNLOCK_TIMES {
            self.output_unlock_times.get(index).copied().unwrap_or(0)
        } else {
            self.unlock_time
        }
    }

    pub fn tx_public_key(&self) -> Option<PublicKey> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::TxPublicKey(key) => Some(*key),
            _ => None,
        })
    }

    pub fn service_node_pubkey(&self) -> Option<PublicKey> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::ServiceNodePubkey(key) => Some(*key),
            _ => None,
        })
    }

    pub fn registration(&self) -> Option<&RegistrationExtra> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::ServiceNodeRegister(reg) => Some(reg),
            _ => None,
        })
    }

    pub fn contributor(&self) -> Option<AccountAddress> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::ServiceNodeContributor(addr) => Some(*addr),
            _ => None,
        })
    }

    pub fn tx_secret_key(&self) -> Option<SecretKey> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::TxSecretKey(key) => Some(*key),
            _ => None,
        })
    }

    pub fn key_image_proofs(&self) -> Option<&[KeyImageProof]> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::KeyImageProofs(proofs) => Some(proofs.as_slice()),
            _ => None,
        })
    }

    pub fn key_image_unlock(&self) -> Option<&KeyImageUnlockExtra> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::KeyImageUnlock(unlock) => Some(unlock),
            _ => None,
        })
    }

    pub fn state_change(&self) -> Option<&StateChangeExtra> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::StateChange(change) => Some(change),
            _ => None,
        })
    }

    /// Reward winner declared by a coinbase transaction.
    pub fn service_node_winner(&self) -> Option<PublicKey> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::ServiceNodeWinner(key) => Some(*key),
            _ => None,
        })
    }

    pub fn eth_new_service_node(&self) -> Option<&EthNewServiceNodeExtra> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::EthNewServiceNode(reg) => Some(reg),
            _ => None,
        })
    }

    pub fn eth_leave_request(&self) -> Option<&EthLeaveRequestExtra> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::EthLeaveRequest(req) => Some(req),
            _ => None,
        })
    }

    pub fn eth_exit(&self) -> Option<&EthExitExtra> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::EthExit(exit) => Some(exit),
            _ => None,
        })
    }

    pub fn eth_deregister(&self) -> Option<&EthDeregisterExtra> {
        self.extra.iter().find_map(|field| match field {
            TxExtraField::EthDeregister(dereg) => Some(dereg),
            _ => None,
        })
    }
}

// =============================================================================
// CLUSTER D: BLOCKS & CHECKPOINTS
// =============================================================================

/// Pulse fields of a block header. All zero on miner blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PulseHeader {
    /// Production round; 0 means the queued leader produced the block.
    pub round: u8,
    /// Bit `i` set means validator `i` signed.
    pub validator_bitset: u16,
    /// Producer-contributed randomness mixed into future quorum entropy.
    pub random_value: [u8; 16],
}

/// A quorum member's signature, indexed by its position in the quorum.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSignature {
    pub voter_index: u16,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// A block as seen by the service node subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub height: u64,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub major_version: HardFork,
    pub timestamp: u64,
    pub nonce: u32,
    pub pulse: PulseHeader,
    pub signatures: Vec<QuorumSignature>,
    pub miner_tx: Transaction,
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    /// True when the block carries any Pulse data at all.
    pub fn has_pulse_components(&self) -> bool {
        self.pulse.validator_bitset != 0 || !self.signatures.is_empty()
    }
}

/// Checkpoint locking in a past block, signed by a checkpointing quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Checkpoint {
    pub height: u64,
    pub block_hash: Hash,
    pub signatures: Vec<QuorumSignature>,
}
