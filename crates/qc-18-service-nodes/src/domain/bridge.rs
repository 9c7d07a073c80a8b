//! Bridge transactions
//!
//! Registrations, leave requests, exits and forced removals relayed from the
//! external staking contract. Nodes are addressed by BLS key.

use super::info::{Contributor, ServiceNodeInfo};
use super::registration::{
    eth_reg_tx_extract_fields, validate_registration, validate_registration_signature,
};
use super::registry::RegistryState;
use super::rules::{
    get_locked_key_image_unlock_height, KEY_IMAGE_AWAITING_UNLOCK_HEIGHT, UNASSIGNED_SWARM_ID,
};
use super::transitions::{log_node_event, BlockOutcome, TransitionContext};
use crate::config::NetworkConfig;
use crate::error::RegistrationError;
use crate::ports::outbound::{CryptoProvider, ReturnedStake, ReturnedStakes};
use shared_types::{Block, BlsPublicKey, HardFork, PublicKey, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Validate a bridge registration and build the node's entry. Bridge stakes
/// arrive fully contributed.
pub fn validate_and_get_eth_registration(
    crypto: &dyn CryptoProvider,
    net: &NetworkConfig,
    hf: HardFork,
    tx: &Transaction,
    block_timestamp: u64,
    block_height: u64,
    index: u32,
) -> Result<(PublicKey, ServiceNodeInfo), RegistrationError> {
    let reg = eth_reg_tx_extract_fields(hf, tx).ok_or_else(|| {
        RegistrationError::new("Could not extract registration details from transaction")
    })?;

    let staking_requirement = net.staking_requirement;
    validate_registration(hf, net, staking_requirement, block_timestamp, &reg)?;
    validate_registration_signature(crypto, &reg)?;

    let Some(&(operator, _)) = reg.eth_contributions.first() else {
        return Err(RegistrationError::new("No operator contribution given"));
    };
    let mut info = ServiceNodeInfo {
        staking_requirement,
        operator_ethereum_address: operator,
        bls_public_key: reg.bls_pubkey,
        portions_for_operator: staking_requirement,
        registration_height: block_height,
        registration_hf_version: hf,
        last_reward_block_height: block_height,
        last_reward_transaction_index: index,
        swarm_id: UNASSIGNED_SWARM_ID,
        last_ip_change_height: block_height,
        active_since_height: block_height as i64,
        ..ServiceNodeInfo::default()
    };

    for (i, (address, amount)) in reg.eth_contributions.iter().enumerate() {
        if reg.eth_contributions[i + 1..]
            .iter()
            .any(|(other, _)| other == address)
        {
            return Err(RegistrationError::new(format!(
                "duplicate reserved address in registration (tx {})",
                hex::encode(tx.hash)
            )));
        }
        info.contributors.push(Contributor {
            amount: *amount,
            reserved: *amount,
            ethereum_address: *address,
            ..Contributor::default()
        });
        info.total_reserved += amount;
        info.total_contributed += amount;
    }

    Ok((reg.service_node_pubkey, info))
}

impl RegistryState {
    /// Registered node carrying `bls_pubkey`.
    pub fn find_by_bls_key(&self, bls_pubkey: &BlsPublicKey) -> Option<PublicKey> {
        self.service_nodes_infos
            .iter()
            .find(|(_, info)| info.bls_public_key == *bls_pubkey)
            .map(|(key, _)| *key)
    }

    pub(super) fn process_eth_registration_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        block: &Block,
        tx: &Transaction,
        index: u32,
        outcome: &mut BlockOutcome,
    ) {
        match validate_and_get_eth_registration(
            ctx.crypto,
            ctx.net,
            block.major_version,
            tx,
            block.timestamp,
            block.height,
            index,
        ) {
            Ok((key, info)) => {
                if ctx.is_me(&key) {
                    info!(
                        "[qc-18] Service node registered (yours) from ethereum: {} on height: {}",
                        hex::encode(key),
                        block.height
                    );
                } else {
                    info!(
                        "[qc-18] New service node registered from ethereum: {} on height: {}",
                        hex::encode(key),
                        block.height
                    );
                }
                outcome.registered.push(key);
                self.service_nodes_infos.insert(key, Arc::new(info));
            }
            Err(err) => {
                error!("[qc-18] Failed to register node from ethereum transaction: {}", err);
            }
        }
    }

    /// Leave requests are idempotent: a repeat keeps the first unlock height.
    pub(super) fn process_eth_unlock_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        block_height: u64,
        tx: &Transaction,
    ) -> bool {
        let Some(unlock) = tx.eth_leave_request() else {
            info!(
                "[qc-18] Unlock TX: couldnt process unlock request, rejected on height: {} for tx: {}",
                block_height,
                hex::encode(tx.hash)
            );
            return false;
        };
        let Some(key) = self.find_by_bls_key(&unlock.bls_pubkey) else {
            return false;
        };
        let Some(info) = self.info_mut(&key) else {
            return false;
        };

        if info.requested_unlock_height != KEY_IMAGE_AWAITING_UNLOCK_HEIGHT {
            info!(
                "[qc-18] Unlock TX: Node already requested an unlock at height: {} rejected on height: {} for tx: {}",
                info.requested_unlock_height,
                block_height,
                hex::encode(tx.hash)
            );
            return true;
        }
        info.requested_unlock_height =
            get_locked_key_image_unlock_height(ctx.net, info.registration_height, block_height);
        true
    }

    /// Hand the exiting node's stakes back to the ledger. A partial exit
    /// forfeits the shortfall from the operator's stake and is delayed by one
    /// lock period.
    pub(super) fn process_eth_exit_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        block_height: u64,
        tx: &Transaction,
        outcome: &mut BlockOutcome,
    ) -> bool {
        let Some(exit) = tx.eth_exit() else {
            info!(
                "[qc-18] Unlock TX: couldnt process exit, rejected on height: {} for tx: {}",
                block_height,
                hex::encode(tx.hash)
            );
            return false;
        };
        let Some(key) = self.find_by_bls_key(&exit.bls_pubkey) else {
            info!(
                "[qc-18] Exit TX: no service node with BLS key {} on height: {} for tx: {}",
                hex::encode(exit.bls_pubkey),
                block_height,
                hex::encode(tx.hash)
            );
            return false;
        };
        let Some(info) = self.info(&key) else {
            return false;
        };

        let staking_requirement = ctx.net.staking_requirement;
        let (delay_blocks, stake_reduction) = if exit.amount < staking_requirement {
            (ctx.net.staking_lock_blocks, staking_requirement - exit.amount)
        } else {
            (0, 0)
        };

        let mut stakes: Vec<ReturnedStake> = info
            .contributors
            .iter()
            .map(|contributor| ReturnedStake {
                eth_address: contributor.ethereum_address,
                amount: contributor.amount,
            })
            .collect();
        if let Some(operator) = stakes.first_mut() {
            operator.amount = operator.amount.saturating_sub(stake_reduction);
        }

        outcome.returned_stakes.push(ReturnedStakes {
            service_node_pubkey: key,
            height: block_height,
            delay_blocks,
            stakes,
        });
        true
    }

    pub(super) fn process_eth_deregister_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        block_height: u64,
        tx: &Transaction,
    ) -> bool {
        let Some(dereg) = tx.eth_deregister() else {
            info!(
                "[qc-18] Unlock TX: couldnt process deregister, rejected on height: {} for tx: {}",
                block_height,
                hex::encode(tx.hash)
            );
            return false;
        };
        let Some(key) = self.find_by_bls_key(&dereg.bls_pubkey) else {
            debug!(
                "[qc-18] Received deregister tx for non-registered BLS key {} (perhaps a delayed tx?)",
                hex::encode(dereg.bls_pubkey)
            );
            return false;
        };

        log_node_event(ctx.is_me(&key), "Deregistration", &key);
        self.service_nodes_infos.remove(&key);
        true
    }
}
