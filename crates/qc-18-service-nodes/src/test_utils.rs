//! Deterministic fixtures shared by unit and integration tests.
//!
//! Every key is derived from a one-byte seed: node `n` signs with
//! `keypair(n)`, and `operator_address(n)` is a distinct wallet.

use crate::adapters::Ed25519CryptoProvider;
use crate::config::COIN;
use crate::domain::info::{Contributor, ServiceNodeInfo};
use crate::domain::quorum::Quorum;
use crate::domain::registration::{get_registration_hash, RegistrationDetails};
use crate::domain::registry::InfoPtr;
use crate::domain::verifier::state_change_vote_hash;
use crate::ports::outbound::CryptoProvider;
use shared_crypto::{fast_hash, Ed25519KeyPair};
use shared_types::{
    AccountAddress, Block, BlsPublicKey, EthAddress, EthContributor, EthNewServiceNodeExtra,
    HardFork, Hash, KeyImage, KeyImageProof, KeyImageUnlockExtra, NewState, PublicKey,
    PulseHeader, QuorumSignature, RegistrationExtra, Signature, StateChangeExtra,
    StateChangeVote, Transaction, TxExtraField, TxOutput, TxType,
};
use std::sync::Arc;

/// Expiry used for portion registrations; far in the future.
pub const PORTION_REGISTRATION_EXPIRY: u64 = 4_000_000_000;

pub fn keypair(seed: u8) -> Ed25519KeyPair {
    Ed25519KeyPair::from_seed([seed; 32])
}

pub fn node_pubkey(seed: u8) -> PublicKey {
    keypair(seed).public_key().to_bytes()
}

pub fn sign_hash(seed: u8, hash: &Hash) -> Signature {
    *keypair(seed).sign(hash).as_bytes()
}

pub fn test_crypto() -> Ed25519CryptoProvider {
    Ed25519CryptoProvider::new()
}

pub fn operator_address(seed: u8) -> AccountAddress {
    let mut spend = [seed; 32];
    spend[..2].copy_from_slice(&[0xa5, 0x01]);
    let mut view = [seed; 32];
    view[..2].copy_from_slice(&[0x5a, 0x02]);
    AccountAddress::new(
        Ed25519KeyPair::from_seed(spend).public_key().to_bytes(),
        Ed25519KeyPair::from_seed(view).public_key().to_bytes(),
    )
}

fn tx_hash(tag: &[u8], parts: &[u8]) -> Hash {
    let mut data = tag.to_vec();
    data.extend_from_slice(parts);
    fast_hash(&data)
}

/// Registration for node `seed`, signed by that node. Amount-based from
/// HF19, portion-based before.
pub fn signed_registration(
    crypto: &Ed25519CryptoProvider,
    seed: u8,
    hf: HardFork,
    reserved: Vec<(AccountAddress, u64)>,
) -> (RegistrationDetails, Hash) {
    signed_registration_with_fee(crypto, seed, hf, reserved, 0)
}

/// As `signed_registration`, charging the operator `fee`.
pub fn signed_registration_with_fee(
    crypto: &Ed25519CryptoProvider,
    seed: u8,
    hf: HardFork,
    reserved: Vec<(AccountAddress, u64)>,
    fee: u64,
) -> (RegistrationDetails, Hash) {
    let (hf_field, uses_portions) = if hf >= HardFork::REWARD_BATCHING {
        (u64::from(hf.as_u8()), false)
    } else {
        (PORTION_REGISTRATION_EXPIRY, true)
    };
    let mut reg = RegistrationDetails {
        service_node_pubkey: node_pubkey(seed),
        reserved,
        eth_contributions: Vec::new(),
        bls_pubkey: [0; 64],
        fee,
        hf: hf_field,
        uses_portions,
        signature: [0; 64],
    };
    let hash = get_registration_hash(crypto, &reg);
    reg.signature = sign_hash(seed, &hash);
    (reg, hash)
}

/// One locked output of `amount` to `contributor`, with its key-image proof.
fn stake_transfer(
    crypto: &Ed25519CryptoProvider,
    node_seed: u8,
    contributor: AccountAddress,
    amount: u64,
    key_image_seed: u8,
    tx_type: TxType,
) -> Transaction {
    let tx_key = [key_image_seed ^ 0x3c; 32];
    let derivation = crypto
        .generate_key_derivation(&contributor.view_public_key, &tx_key)
        .expect("test view keys are valid points");
    let output_keypair = crypto.output_keypair(&derivation, 0, &contributor.spend_public_key);
    let key_image: KeyImage = [key_image_seed; 32];

    let mut hash_parts = vec![node_seed, key_image_seed];
    hash_parts.extend_from_slice(&amount.to_le_bytes());
    Transaction {
        hash: tx_hash(b"stake", &hash_parts),
        version: 4,
        tx_type,
        unlock_time: 0,
        output_unlock_times: vec![0],
        outputs: vec![TxOutput {
            key: output_keypair.public_key().to_bytes(),
            amount: 0,
            masked_amount: crypto.encode_amount(&derivation, 0, amount),
        }],
        extra: vec![
            TxExtraField::ServiceNodePubkey(node_pubkey(node_seed)),
            TxExtraField::ServiceNodeContributor(contributor),
            TxExtraField::TxSecretKey(tx_key),
            TxExtraField::KeyImageProofs(vec![KeyImageProof {
                key_image,
                signature: *output_keypair.sign(&key_image).as_bytes(),
            }]),
        ],
    }
}

/// Registration of node `seed` staking `staked_amount` from the operator.
pub fn stake_tx(
    crypto: &Ed25519CryptoProvider,
    seed: u8,
    hf: HardFork,
    reserved: Vec<(AccountAddress, u64)>,
    staked_amount: u64,
) -> Transaction {
    stake_tx_with_fee(crypto, seed, hf, reserved, staked_amount, 0)
}

pub fn stake_tx_with_fee(
    crypto: &Ed25519CryptoProvider,
    seed: u8,
    hf: HardFork,
    reserved: Vec<(AccountAddress, u64)>,
    staked_amount: u64,
    fee: u64,
) -> Transaction {
    let (reg, _) = signed_registration_with_fee(crypto, seed, hf, reserved, fee);
    let operator = reg.reserved[0].0;
    let mut tx = stake_transfer(
        crypto,
        seed,
        operator,
        staked_amount,
        seed.wrapping_add(100),
        TxType::staking_type_for_hf(hf),
    );
    tx.extra.push(TxExtraField::ServiceNodeRegister(RegistrationExtra {
        public_spend_keys: reg.reserved.iter().map(|(a, _)| a.spend_public_key).collect(),
        public_view_keys: reg.reserved.iter().map(|(a, _)| a.view_public_key).collect(),
        fee: reg.fee,
        amounts: reg.reserved.iter().map(|(_, amount)| *amount).collect(),
        hf_or_expiration: reg.hf,
        signature: reg.signature,
    }));
    tx
}

/// Contribution to an existing node. `key_image_seed` keeps tx hashes and
/// key images distinct.
pub fn contribution_tx(
    crypto: &Ed25519CryptoProvider,
    node_seed: u8,
    contributor: AccountAddress,
    amount: u64,
    key_image_seed: u8,
) -> Transaction {
    stake_transfer(
        crypto,
        node_seed,
        contributor,
        amount,
        key_image_seed,
        TxType::Stake,
    )
}

/// Bridge registration for node `seed` at HF21.
pub fn eth_registration_tx(
    crypto: &Ed25519CryptoProvider,
    seed: u8,
    bls_pubkey: BlsPublicKey,
    contributors: &[(EthAddress, u64)],
) -> Transaction {
    let reg = RegistrationDetails {
        service_node_pubkey: node_pubkey(seed),
        reserved: Vec::new(),
        eth_contributions: contributors.to_vec(),
        bls_pubkey,
        fee: 0,
        hf: u64::from(HardFork::Hf21.as_u8()),
        uses_portions: false,
        signature: [0; 64],
    };
    let hash = get_registration_hash(crypto, &reg);
    Transaction {
        hash: tx_hash(b"eth-register", &[seed]),
        tx_type: TxType::EthNewServiceNode,
        extra: vec![TxExtraField::EthNewServiceNode(EthNewServiceNodeExtra {
            bls_pubkey,
            eth_address: contributors.first().map(|(address, _)| *address).unwrap_or_default(),
            service_node_pubkey: reg.service_node_pubkey,
            signature: sign_hash(seed, &hash),
            fee: 0,
            contributors: contributors
                .iter()
                .map(|&(address, amount)| EthContributor { address, amount })
                .collect(),
        })],
        ..Transaction::default()
    }
}

/// `count` fully funded, active nodes keyed by `node_pubkey(0..count)`,
/// ordered by key. Node `i` was last rewarded at height `i`.
pub fn active_nodes(count: u8) -> Vec<(PublicKey, InfoPtr)> {
    let mut nodes: Vec<(PublicKey, InfoPtr)> = (0..count)
        .map(|seed| {
            let operator = operator_address(seed);
            let info = ServiceNodeInfo {
                registration_hf_version: HardFork::Hf19,
                registration_height: 1,
                active_since_height: 1,
                last_reward_block_height: u64::from(seed),
                staking_requirement: 100 * COIN,
                total_contributed: 100 * COIN,
                total_reserved: 100 * COIN,
                operator_address: operator,
                swarm_id: 0,
                contributors: vec![Contributor {
                    amount: 100 * COIN,
                    reserved: 100 * COIN,
                    address: operator,
                    ..Contributor::default()
                }],
                ..ServiceNodeInfo::default()
            };
            (node_pubkey(seed), Arc::new(info))
        })
        .collect();
    nodes.sort_by(|a, b| a.0.cmp(&b.0));
    nodes
}

/// A full set of Pulse entropy hashes.
pub fn entropy_for(seed: u8) -> Vec<Hash> {
    (0..crate::domain::rules::PULSE_QUORUM_SIZE as u8)
        .map(|index| fast_hash(&[seed, index]))
        .collect()
}

/// Pulse block signed by validators `voters` (seeds and quorum indexes at once).
pub fn pulse_block(height: u64, round: u8, voters: &[u8]) -> Block {
    let hash = [height as u8; 32];
    let validator_bitset = voters
        .iter()
        .fold(0u16, |bits, &voter| bits | (1 << voter));
    Block {
        height,
        hash,
        prev_hash: [height.wrapping_sub(1) as u8; 32],
        major_version: HardFork::Hf19,
        nonce: 0,
        pulse: PulseHeader {
            round,
            validator_bitset,
            random_value: [height as u8; 16],
        },
        signatures: voters
            .iter()
            .map(|&voter| QuorumSignature {
                voter_index: u16::from(voter),
                signature: sign_hash(voter, &hash),
            })
            .collect(),
        ..Block::default()
    }
}

/// State change voted by the first `num_votes` validators of `quorum`, which
/// must be built from `node_pubkey` keys.
pub fn state_change_tx(
    crypto: &Ed25519CryptoProvider,
    quorum: &Quorum,
    quorum_height: u64,
    worker_index: u32,
    state: NewState,
    num_votes: usize,
) -> Transaction {
    let hash = state_change_vote_hash(crypto, quorum_height, worker_index, state);
    let votes = quorum
        .validators
        .iter()
        .take(num_votes)
        .enumerate()
        .map(|(index, key)| {
            let seed = (0..=u8::MAX)
                .find(|&seed| node_pubkey(seed) == *key)
                .expect("validator derived from a test seed");
            StateChangeVote {
                validator_index: index as u32,
                signature: sign_hash(seed, &hash),
            }
        })
        .collect();

    let mut hash_parts = quorum_height.to_le_bytes().to_vec();
    hash_parts.extend_from_slice(&worker_index.to_le_bytes());
    hash_parts.extend_from_slice(&state.as_u16().to_le_bytes());
    hash_parts.push(num_votes as u8);
    Transaction {
        hash: tx_hash(b"state-change", &hash_parts),
        tx_type: TxType::StateChange,
        extra: vec![TxExtraField::StateChange(StateChangeExtra {
            state,
            block_height: quorum_height,
            service_node_index: worker_index,
            reason_consensus_all: 0,
            reason_consensus_any: 0,
            votes,
        })],
        ..Transaction::default()
    }
}

pub fn unlock_tx(
    node_key: PublicKey,
    key_image: KeyImage,
    nonce: u32,
    signature: Signature,
) -> Transaction {
    let mut hash_parts = node_key.to_vec();
    hash_parts.extend_from_slice(&key_image);
    hash_parts.extend_from_slice(&nonce.to_le_bytes());
    Transaction {
        hash: tx_hash(b"unlock", &hash_parts),
        tx_type: TxType::KeyImageUnlock,
        extra: vec![
            TxExtraField::ServiceNodePubkey(node_key),
            TxExtraField::KeyImageUnlock(KeyImageUnlockExtra {
                key_image,
                nonce,
                signature,
            }),
        ],
        ..Transaction::default()
    }
}
