//! # Reward Payouts
//!
//! Splits a block's service node reward between a node's contributors and
//! checks the miner transaction against the split.
//!
//! ## Payee sets by hardfork
//!
//! | Hardfork | Outputs |
//! |----------|---------|
//! | < HF19, miner block | miner, queue leader's contributors, governance |
//! | < HF19, Pulse block | producer's contributors (alt rounds), leader's contributors, governance |
//! | HF19..HF21 | one output per batched payment, in milli-atomic units |
//! | >= HF21 | none; rewards are paid outside the chain |
//!
//! Amounts are computed with 128-bit integer math. Outputs may differ from
//! the computed split by one atomic unit.

use super::info::ServiceNodeInfo;
use super::quorum_gen::{
    generate_pulse_quorum, get_pulse_entropy_for_next_block, is_complete_pulse_quorum,
};
use super::registry::RegistryState;
use super::rules::{mul128_div64, within_one, BATCH_REWARD_FACTOR, STAKING_PORTIONS};
use crate::config::NetworkConfig;
use crate::error::BlockVerificationError;
use crate::ports::outbound::{BlockchainReader, CryptoProvider};
use shared_types::{AccountAddress, Block, HardFork, PublicKey, Transaction, NULL_PUBKEY};

/// One contributor's share of a node's reward, in `STAKING_PORTIONS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayoutEntry {
    pub address: AccountAddress,
    pub portions: u64,
}

/// Reward split for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub key: PublicKey,
    pub payouts: Vec<PayoutEntry>,
}

impl Payout {
    pub fn null() -> Self {
        Self {
            key: NULL_PUBKEY,
            payouts: Vec::new(),
        }
    }
}

/// Contributor shares of `info`'s reward. The operator's fee comes off the
/// top; the rest is split by contributed amount.
pub fn service_node_payout_portions(key: &PublicKey, info: &ServiceNodeInfo) -> Payout {
    let remaining_portions = STAKING_PORTIONS.saturating_sub(info.portions_for_operator);
    let payouts = info
        .contributors
        .iter()
        .map(|contributor| {
            let mut portions = if info.staking_requirement == 0 {
                0
            } else {
                mul128_div64(contributor.amount, remaining_portions, info.staking_requirement)
            };
            if contributor.address == info.operator_address {
                portions = portions.saturating_add(info.portions_for_operator);
            }
            PayoutEntry {
                address: contributor.address,
                portions,
            }
        })
        .collect();
    Payout { key: *key, payouts }
}

/// Split `total_reward` by portions. With `distribute_remainder` the atoms lost
/// to rounding go one each to the payees in order.
pub fn distribute_reward_by_portions(
    payouts: &[PayoutEntry],
    total_reward: u64,
    distribute_remainder: bool,
) -> Vec<u64> {
    let mut result: Vec<u64> = payouts
        .iter()
        .map(|payout| mul128_div64(total_reward, payout.portions, STAKING_PORTIONS))
        .collect();

    if distribute_remainder && !result.is_empty() {
        let paid: u64 = result.iter().sum();
        let remainder = total_reward.saturating_sub(paid);
        let count = result.len();
        for i in 0..remainder as usize {
            result[i % count] += 1;
        }
    }
    result
}

/// Governance is paid every block before HF10, then every governance
/// interval until batching takes over.
pub fn height_has_governance_output(net: &NetworkConfig, hf: HardFork, height: u64) -> bool {
    if height == 0 || hf >= HardFork::REWARD_BATCHING {
        return false;
    }
    if hf <= HardFork::SERVICE_NODES {
        return true;
    }
    net.governance_reward_interval != 0 && height % net.governance_reward_interval == 0
}

/// One-time key of output `index` paying `address` in the block at `height`.
pub fn deterministic_output_key(
    crypto: &dyn CryptoProvider,
    address: &AccountAddress,
    height: u64,
    index: usize,
) -> Option<PublicKey> {
    let (_, secret) = crypto.deterministic_keypair_from_height(height);
    let derivation = crypto.generate_key_derivation(&address.view_public_key, &secret)?;
    crypto.derive_public_key(&derivation, index, &address.spend_public_key)
}

/// Reward components of a block as computed by the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRewardParts {
    pub base_miner: u64,
    pub miner_fee: u64,
    pub service_node_total: u64,
}

/// Accrued reward owed to an address, in milli-atomic units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchPayment {
    pub address: AccountAddress,
    pub amount: u64,
}

/// Everything needed to check a block's miner transaction.
#[derive(Clone, Copy, Debug)]
pub struct MinerTxInfo<'a> {
    pub block: &'a Block,
    pub reward_parts: BlockRewardParts,
    pub batched_payments: &'a [BatchPayment],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum VerifyMode {
    Miner,
    PulseLeaderIsProducer,
    PulseDifferentProducer,
    BatchedRewards,
    ExternalRewards,
}

impl VerifyMode {
    fn block_kind(self) -> &'static str {
        match self {
            VerifyMode::Miner => "miner",
            VerifyMode::PulseLeaderIsProducer => "pulse",
            VerifyMode::PulseDifferentProducer => "pulse alt round",
            VerifyMode::BatchedRewards => "batch reward",
            VerifyMode::ExternalRewards => "external rewards",
        }
    }
}

fn verify_coinbase_tx_output(
    crypto: &dyn CryptoProvider,
    miner_tx: &Transaction,
    height: u64,
    output_index: usize,
    receiver: &AccountAddress,
    reward: u64,
) -> Result<(), BlockVerificationError> {
    let output = miner_tx.outputs.get(output_index).ok_or(
        BlockVerificationError::OutputIndexOutOfBounds {
            index: output_index,
            size: miner_tx.outputs.len(),
        },
    )?;

    if !within_one(output.amount, reward) {
        return Err(BlockVerificationError::RewardAmount {
            expected: reward,
            actual: output.amount,
        });
    }

    match deterministic_output_key(crypto, receiver, height, output_index) {
        Some(key) if key == output.key => Ok(()),
        _ => Err(BlockVerificationError::RewardKey {
            index: output_index,
        }),
    }
}

/// Pay `payout` its share of `total` starting at output `vout_index`;
/// returns the next unused output index.
fn verify_payout_outputs(
    crypto: &dyn CryptoProvider,
    miner_tx: &Transaction,
    height: u64,
    mut vout_index: usize,
    payout: &Payout,
    total: u64,
    distribute_remainder: bool,
) -> Result<usize, BlockVerificationError> {
    let split = distribute_reward_by_portions(&payout.payouts, total, distribute_remainder);
    for (entry, reward) in payout.payouts.iter().zip(split) {
        if reward != 0 {
            verify_coinbase_tx_output(crypto, miner_tx, height, vout_index, &entry.address, reward)?;
            vout_index += 1;
        }
    }
    Ok(vout_index)
}

/// Check the miner transaction of `info.block` against `state`, the registry
/// as of the block's parent.
pub fn validate_miner_tx(
    crypto: &dyn CryptoProvider,
    net: &NetworkConfig,
    blockchain: &dyn BlockchainReader,
    state: &RegistryState,
    info: &MinerTxInfo<'_>,
) -> Result<(), BlockVerificationError> {
    let block = info.block;
    let parts = info.reward_parts;
    let hf = block.major_version;
    if hf < HardFork::SERVICE_NODES {
        return Ok(());
    }

    let height = block.height;
    let miner_tx = &block.miner_tx;

    let leader = state.get_block_leader();
    let leader_payout = state
        .info(&leader.key)
        .map(|leader_info| service_node_payout_portions(&leader.key, leader_info))
        .unwrap_or_else(Payout::null);

    let declared_winner = miner_tx.service_node_winner().unwrap_or(NULL_PUBKEY);
    if declared_winner != leader.key {
        return Err(BlockVerificationError::WrongWinner {
            expected: hex::encode(leader.key),
            height,
            hf: hf.as_u8(),
            actual: hex::encode(declared_winner),
        });
    }

    let mut mode = VerifyMode::Miner;
    let mut producer_key = NULL_PUBKEY;
    if block.has_pulse_components() {
        let entropy = get_pulse_entropy_for_next_block(
            blockchain,
            crypto,
            &block.prev_hash,
            block.pulse.round,
        );
        let quorum = generate_pulse_quorum(
            net.pulse_min_service_nodes,
            &leader.key,
            hf,
            &state.active_service_nodes_infos(),
            &entropy,
            block.pulse.round,
        );
        if !is_complete_pulse_quorum(&quorum) {
            return Err(BlockVerificationError::InsufficientPulseNodes {
                block_hash: hex::encode(block.hash),
                height,
            });
        }
        producer_key = quorum.workers[0];
        mode = if producer_key == leader.key {
            VerifyMode::PulseLeaderIsProducer
        } else {
            VerifyMode::PulseDifferentProducer
        };
        if block.pulse.round == 0 && mode == VerifyMode::PulseDifferentProducer {
            return Err(BlockVerificationError::Round0ProducerMismatch {
                leader: hex::encode(leader.key),
                producer: hex::encode(producer_key),
            });
        }
    }

    if hf >= HardFork::ETH_BLS {
        mode = VerifyMode::ExternalRewards;
    } else if hf >= HardFork::REWARD_BATCHING {
        mode = VerifyMode::BatchedRewards;
    }

    let mut producer_payout = None;
    let mut expected_outputs = match mode {
        VerifyMode::ExternalRewards => 0,
        VerifyMode::BatchedRewards => info.batched_payments.len(),
        VerifyMode::PulseLeaderIsProducer | VerifyMode::PulseDifferentProducer => {
            let producer = state.info(&producer_key).ok_or_else(|| {
                BlockVerificationError::UnknownProducer {
                    round: block.pulse.round,
                    producer: hex::encode(producer_key),
                }
            })?;
            let count = if mode == VerifyMode::PulseDifferentProducer && parts.miner_fee > 0 {
                producer.contributors.len()
            } else {
                0
            };
            producer_payout = Some(service_node_payout_portions(&producer_key, producer));
            count
        }
        VerifyMode::Miner => usize::from(parts.base_miner + parts.miner_fee > 0),
    };

    if mode < VerifyMode::BatchedRewards {
        expected_outputs += leader_payout.payouts.len();
        if height_has_governance_output(net, hf, height) {
            expected_outputs += 1;
        }
    }

    if miner_tx.outputs.len() != expected_outputs {
        return Err(BlockVerificationError::OutputCount {
            block_kind: mode.block_kind(),
            expected: expected_outputs,
            actual: miner_tx.outputs.len(),
        });
    }

    if hf >= HardFork::PULSE && parts.base_miner != 0 {
        return Err(BlockVerificationError::NonZeroMinerReward {
            amount: parts.base_miner,
        });
    }

    match mode {
        VerifyMode::Miner => {
            // The miner output absorbs rounding, so only the service node outputs are checked.
            let first = usize::from(parts.base_miner + parts.miner_fee > 0);
            verify_payout_outputs(
                crypto,
                miner_tx,
                height,
                first,
                &leader_payout,
                parts.service_node_total,
                hf >= HardFork::PULSE,
            )?;
        }
        VerifyMode::PulseLeaderIsProducer => {
            verify_payout_outputs(
                crypto,
                miner_tx,
                height,
                0,
                &leader_payout,
                parts.service_node_total + parts.miner_fee,
                true,
            )?;
        }
        VerifyMode::PulseDifferentProducer => {
            let mut vout_index = 0;
            if let Some(producer_payout) = &producer_payout {
                vout_index = verify_payout_outputs(
                    crypto,
                    miner_tx,
                    height,
                    vout_index,
                    producer_payout,
                    parts.miner_fee,
                    true,
                )?;
            }
            verify_payout_outputs(
                crypto,
                miner_tx,
                height,
                vout_index,
                &leader_payout,
                parts.service_node_total,
                true,
            )?;
        }
        VerifyMode::BatchedRewards => {
            verify_batched_payments(crypto, miner_tx, height, info.batched_payments)?;
        }
        VerifyMode::ExternalRewards => {}
    }
    Ok(())
}

fn verify_batched_payments(
    crypto: &dyn CryptoProvider,
    miner_tx: &Transaction,
    height: u64,
    payments: &[BatchPayment],
) -> Result<(), BlockVerificationError> {
    let expected_total = payments
        .iter()
        .fold(0u64, |total, payment| total.saturating_add(payment.amount));
    let max_amount = u64::MAX / BATCH_REWARD_FACTOR;

    let mut paid_total = 0u64;
    for (index, (output, payment)) in miner_tx.outputs.iter().zip(payments).enumerate() {
        if output.amount > max_amount {
            return Err(BlockVerificationError::BatchedPayment {
                index,
                reason: "exceeds maximum possible payout size".to_string(),
            });
        }
        let paid = output.amount * BATCH_REWARD_FACTOR;
        paid_total = paid_total.saturating_add(paid);
        if paid != payment.amount {
            return Err(BlockVerificationError::BatchedPayment {
                index,
                reason: format!("expected {}, not {}", payment.amount, paid),
            });
        }
        if deterministic_output_key(crypto, &payment.address, height, index) != Some(output.key) {
            return Err(BlockVerificationError::BatchedPayment {
                index,
                reason: "Output Ephemeral Public Key does not match (payment to wrong recipient)"
                    .to_string(),
            });
        }
    }

    if paid_total != expected_total {
        return Err(BlockVerificationError::BatchedTotal {
            expected: expected_total,
            actual: paid_total,
        });
    }
    Ok(())
}
