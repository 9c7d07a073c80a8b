//! # Block Verifier
//!
//! Signature and component checks a block must pass against the quorums the
//! registry computed for it.
//!
//! ## Pulse timing
//!
//! ```text
//! r0 = prev_timestamp + TARGET_BLOCK_TIME
//!
//! round r window:  [r0 + r * PULSE_ROUND_TIME, r0 + (r + 1) * PULSE_ROUND_TIME]
//! miner fallback:  r0 + PULSE_MAX_ROUNDS * PULSE_ROUND_TIME
//! ```
//!
//! After the fallback timestamp a block must be mined; before it, a block
//! must be a Pulse block whenever a Pulse quorum exists for its height.

use super::history::HistoryView;
use super::quorum::{Quorum, QuorumType};
use super::rules::{
    CHECKPOINT_INTERVAL, CHECKPOINT_MIN_VOTES, PULSE_BLOCK_REQUIRED_SIGNATURES, PULSE_MAX_ROUNDS,
    PULSE_ROUND_TIME, PULSE_VALIDATOR_BITSET_LIMIT, STATE_CHANGE_MIN_VOTES_TO_CHANGE_STATE,
    STATE_CHANGE_TX_LIFETIME_IN_BLOCKS, TARGET_BLOCK_TIME,
};
use crate::config::NetworkConfig;
use crate::error::BlockVerificationError;
use crate::ports::outbound::{BlockchainReader, CryptoProvider};
use shared_types::{
    Block, Checkpoint, HardFork, Hash, NewState, QuorumSignature, StateChangeExtra,
};
use std::sync::Arc;
use tracing::info;

/// Round schedule derived from the parent block's timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseTimings {
    pub prev_timestamp: u64,
    pub r0_timestamp: u64,
    pub miner_fallback_timestamp: u64,
}

pub fn get_round_timings(prev_timestamp: u64) -> PulseTimings {
    let r0_timestamp = prev_timestamp + TARGET_BLOCK_TIME;
    PulseTimings {
        prev_timestamp,
        r0_timestamp,
        miner_fallback_timestamp: r0_timestamp + PULSE_MAX_ROUNDS * PULSE_ROUND_TIME,
    }
}

/// Message signed by each state-change voter.
pub fn state_change_vote_hash(
    crypto: &dyn CryptoProvider,
    block_height: u64,
    service_node_index: u32,
    state: NewState,
) -> Hash {
    let mut buffer = Vec::with_capacity(8 + 4 + 2);
    buffer.extend_from_slice(&block_height.to_le_bytes());
    buffer.extend_from_slice(&service_node_index.to_le_bytes());
    buffer.extend_from_slice(&state.as_u16().to_le_bytes());
    crypto.fast_hash(&buffer)
}

/// Check a state change's votes against the obligations quorum that cast them.
pub fn verify_tx_state_change(
    crypto: &dyn CryptoProvider,
    state_change: &StateChangeExtra,
    latest_height: u64,
    quorum: &Quorum,
) -> Result<(), String> {
    if state_change.votes.len() < STATE_CHANGE_MIN_VOTES_TO_CHANGE_STATE {
        return Err(format!(
            "Not enough votes in state change: {} < {}",
            state_change.votes.len(),
            STATE_CHANGE_MIN_VOTES_TO_CHANGE_STATE
        ));
    }
    if state_change.block_height >= latest_height {
        return Err(format!(
            "State change references quorum height {} at or above the latest height {}",
            state_change.block_height, latest_height
        ));
    }
    if state_change.block_height + STATE_CHANGE_TX_LIFETIME_IN_BLOCKS < latest_height {
        return Err(format!(
            "State change for height {} is too old at height {}",
            state_change.block_height, latest_height
        ));
    }
    if state_change.service_node_index as usize >= quorum.workers.len() {
        return Err(format!(
            "Service node index {} out of bounds for {} workers",
            state_change.service_node_index,
            quorum.workers.len()
        ));
    }

    let hash = state_change_vote_hash(
        crypto,
        state_change.block_height,
        state_change.service_node_index,
        state_change.state,
    );
    let mut seen = vec![false; quorum.validators.len()];
    for vote in &state_change.votes {
        let index = vote.validator_index as usize;
        let Some(validator) = quorum.validators.get(index) else {
            return Err(format!(
                "Validator index {} out of bounds for {} validators",
                index,
                quorum.validators.len()
            ));
        };
        if std::mem::replace(&mut seen[index], true) {
            return Err(format!("Duplicate vote from validator index {index}"));
        }
        if !crypto.verify_signature(&hash, validator, &vote.signature) {
            return Err(format!("Invalid signature from validator index {index}"));
        }
    }
    Ok(())
}

fn verify_ascending_signatures(
    crypto: &dyn CryptoProvider,
    quorum: &Quorum,
    hash: &Hash,
    signatures: &[QuorumSignature],
) -> Result<(), String> {
    let mut previous: Option<u16> = None;
    for signature in signatures {
        if previous.is_some_and(|previous| signature.voter_index <= previous) {
            return Err(format!(
                "Voter indexes are not strictly ascending at index {}",
                signature.voter_index
            ));
        }
        previous = Some(signature.voter_index);

        let Some(validator) = quorum.validators.get(signature.voter_index as usize) else {
            return Err(format!(
                "Voter index {} out of bounds for {} validators",
                signature.voter_index,
                quorum.validators.len()
            ));
        };
        if !crypto.verify_signature(hash, validator, &signature.signature) {
            return Err(format!(
                "Invalid signature from voter index {}",
                signature.voter_index
            ));
        }
    }
    Ok(())
}

pub fn verify_checkpoint(
    crypto: &dyn CryptoProvider,
    hf: HardFork,
    checkpoint: &Checkpoint,
    quorum: &Quorum,
) -> Result<(), String> {
    if hf >= HardFork::ENFORCE_CHECKPOINTS && checkpoint.height % CHECKPOINT_INTERVAL != 0 {
        return Err(format!(
            "Checkpoint height {} is not a multiple of {}",
            checkpoint.height, CHECKPOINT_INTERVAL
        ));
    }
    if checkpoint.signatures.len() < CHECKPOINT_MIN_VOTES {
        return Err(format!(
            "Checkpoint has {} signatures, {} required",
            checkpoint.signatures.len(),
            CHECKPOINT_MIN_VOTES
        ));
    }
    verify_ascending_signatures(crypto, quorum, &checkpoint.block_hash, &checkpoint.signatures)
}

pub fn verify_pulse_signatures(
    crypto: &dyn CryptoProvider,
    quorum: &Quorum,
    block: &Block,
) -> Result<(), String> {
    let bitset = u32::from(block.pulse.validator_bitset);
    if bitset >= PULSE_VALIDATOR_BITSET_LIMIT {
        return Err(format!("Validator bitset {bitset:#x} has bits beyond the quorum"));
    }
    if block.signatures.len() != PULSE_BLOCK_REQUIRED_SIGNATURES
        || bitset.count_ones() as usize != PULSE_BLOCK_REQUIRED_SIGNATURES
    {
        return Err(format!(
            "Pulse block needs exactly {} signatures, has {} (bitset {:#x})",
            PULSE_BLOCK_REQUIRED_SIGNATURES,
            block.signatures.len(),
            bitset
        ));
    }
    for signature in &block.signatures {
        let bit = 1u32.checked_shl(u32::from(signature.voter_index)).unwrap_or(0);
        if bitset & bit == 0 {
            return Err(format!(
                "Voter index {} is not set in the validator bitset",
                signature.voter_index
            ));
        }
    }
    verify_ascending_signatures(crypto, quorum, &block.hash, &block.signatures)
}

fn describe(block: &Block, quorum: Option<&Quorum>) -> String {
    let leader = match quorum {
        None => "(invalid quorum)".to_string(),
        Some(quorum) => quorum
            .workers
            .first()
            .map(hex::encode)
            .unwrap_or_else(|| "(invalid leader)".to_string()),
    };
    format!(
        "Block({}): {}, Leader: {}, Round: {}, Validator Bitset: {:011b}, Signatures: {}",
        block.height,
        hex::encode(block.hash),
        leader,
        block.pulse.round,
        block.pulse.validator_bitset,
        block.signatures.len()
    )
}

/// Structural checks for a miner or Pulse block.
#[allow(clippy::too_many_arguments)]
pub fn verify_block_components(
    crypto: &dyn CryptoProvider,
    net: &NetworkConfig,
    block: &Block,
    miner_block: bool,
    alt_block: bool,
    timings: &PulseTimings,
    pulse_quorum: Option<&Quorum>,
    alt_pulse_quorums: &[Arc<Quorum>],
) -> Result<(), String> {
    let block_kind = if alt_block { "alt block" } else { "block" };

    if miner_block {
        if block.has_pulse_components() {
            return Err(format!(
                "Pulse {block_kind} received but only miner blocks are permitted: {}",
                describe(block, pulse_quorum)
            ));
        }
        if block.pulse.round != 0 {
            return Err(format!(
                "Miner {block_kind} given but unexpectedly set round {} on height {}",
                block.pulse.round, block.height
            ));
        }
        return Ok(());
    }

    if !block.has_pulse_components() {
        return Err(format!(
            "Miner {block_kind} received but only pulse blocks are permitted: {}",
            describe(block, pulse_quorum)
        ));
    }

    if !net.is_fakechain() {
        let begin = timings.r0_timestamp + u64::from(block.pulse.round) * PULSE_ROUND_TIME;
        let end = begin + PULSE_ROUND_TIME;
        if !(begin..=end).contains(&block.timestamp) {
            return Err(format!(
                "Pulse {block_kind} with round {} specifies timestamp {} is not within an acceptable range of time [{}, {}]",
                block.pulse.round, block.timestamp, begin, end
            ));
        }
    }

    if block.nonce != 0 {
        return Err(format!(
            "Pulse {block_kind} specified a nonce when quorum block generation is available, nonce: {}",
            block.nonce
        ));
    }

    if alt_block {
        let main = pulse_quorum
            .map(|quorum| verify_pulse_signatures(crypto, quorum, block))
            .unwrap_or_else(|| Err("no main chain quorum".to_string()));
        if main.is_ok() {
            return Ok(());
        }
        if alt_pulse_quorums
            .iter()
            .any(|quorum| verify_pulse_signatures(crypto, quorum, block).is_ok())
        {
            info!("[qc-18] Alt-block {}:{} verified successfully", block.height, hex::encode(block.hash));
            return Ok(());
        }
        return Err(format!(
            "Pulse {block_kind} failed quorum verification: {}",
            describe(block, pulse_quorum)
        ));
    }

    let Some(quorum) = pulse_quorum else {
        return Err(format!(
            "Pulse {block_kind} specified but no quorum available: {}",
            describe(block, None)
        ));
    };
    verify_pulse_signatures(crypto, quorum, block).map_err(|reason| {
        format!(
            "Pulse {block_kind} failed quorum verification ({reason}): {}",
            describe(block, Some(quorum))
        )
    })
}

/// Collaborators needed to verify a block.
#[derive(Clone, Copy)]
pub struct VerifyContext<'a> {
    pub net: &'a NetworkConfig,
    pub crypto: &'a dyn CryptoProvider,
    pub blockchain: &'a dyn BlockchainReader,
    pub view: HistoryView<'a>,
}

/// Verify the checkpoint carried with `block` and the block's Pulse or miner components.
pub fn verify_block(
    ctx: &VerifyContext<'_>,
    block: &Block,
    alt_block: bool,
    checkpoint: Option<&Checkpoint>,
) -> Result<(), BlockVerificationError> {
    let hf = block.major_version;
    if hf < HardFork::SERVICE_NODES {
        return Ok(());
    }
    let block_kind = if alt_block { "alt block" } else { "block" };

    if let Some(checkpoint) = checkpoint.filter(|_| hf >= HardFork::ENFORCE_CHECKPOINTS) {
        let mut alt_quorums = Vec::new();
        let quorum = ctx
            .view
            .get_quorum(
                QuorumType::Checkpointing,
                checkpoint.height,
                false,
                alt_block.then_some(&mut alt_quorums),
            )
            .ok_or_else(|| BlockVerificationError::MissingCheckpointQuorum {
                block_kind,
                block_hash: hex::encode(block.hash),
            })?;

        let verified = verify_checkpoint(ctx.crypto, hf, checkpoint, &quorum).is_ok()
            || (alt_block
                && alt_quorums
                    .iter()
                    .any(|alt| verify_checkpoint(ctx.crypto, hf, checkpoint, alt).is_ok()));
        if !verified {
            return Err(BlockVerificationError::CheckpointVerification {
                block_kind,
                block_hash: hex::encode(block.hash),
            });
        }
    }

    let components_error = |reason: String| BlockVerificationError::BlockComponents {
        block_kind,
        height: block.height,
        reason,
    };

    let pulse_hf = hf >= HardFork::PULSE;
    let mut timings = get_round_timings(0);
    let mut pulse_quorum = None;
    let mut alt_pulse_quorums = Vec::new();
    if pulse_hf {
        let prev = ctx.blockchain.block_by_hash(&block.prev_hash).ok_or_else(|| {
            components_error(format!(
                "{} {} references previous block {} not available in DB",
                block_kind,
                hex::encode(block.hash),
                hex::encode(block.prev_hash)
            ))
        })?;
        timings = get_round_timings(prev.timestamp);
        pulse_quorum = ctx.view.get_quorum(
            QuorumType::Pulse,
            block.height,
            false,
            alt_block.then_some(&mut alt_pulse_quorums),
        );
        if !ctx.net.is_fakechain() && block.timestamp >= timings.miner_fallback_timestamp {
            pulse_quorum = None;
        }
    }

    let verify = |miner_block: bool| {
        verify_block_components(
            ctx.crypto,
            ctx.net,
            block,
            miner_block,
            alt_block,
            &timings,
            pulse_quorum.as_deref(),
            &alt_pulse_quorums,
        )
    };

    let result = if alt_block {
        // An alt chain may be in any state: accept either form.
        match pulse_hf.then(|| verify(false)) {
            Some(Ok(())) => Ok(()),
            _ => verify(true),
        }
    } else {
        verify(!pulse_hf || pulse_quorum.is_none())
    };
    result.map_err(components_error)
}
