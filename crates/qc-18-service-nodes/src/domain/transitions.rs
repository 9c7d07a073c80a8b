//! # State Transition Engine
//!
//! Applies one block to a `RegistryState`. The order is consensus-critical:
//!
//! 1. Pulse quorum, from the node set *before* this block's transactions
//! 2. Key-image blacklist expiry
//! 3. Node expiry
//! 4. Reward winner moves to the back of the queue
//! 5. Transactions, in block order
//! 6. Swarm rebalancing, if membership of the active set changed
//! 7. Obligations, checkpointing and blink quorums
//!
//! Side effects that live outside the registry (proof resets, returned bridge
//! stakes, recently expired BLS keys) are collected in a [`BlockOutcome`] and
//! applied by the caller once the block is committed.

use super::history::HistoryView;
use super::info::{credit_after_recommission, Contributor, PulseSorter};
use super::quorum::QuorumType;
use super::quorum_gen::{
    generate_other_quorums, generate_pulse_quorum, get_pulse_entropy_for_next_block,
    is_complete_pulse_quorum,
};
use super::registration::{is_registration_tx, tx_get_staking_components_and_amounts};
use super::registry::{KeyImageBlacklistEntry, RegistryState};
use super::rules::{
    get_locked_key_image_unlock_height, get_max_node_contribution, get_min_node_contribution,
    max_contributors_for_hf, mul128_div64, KEY_IMAGE_AWAITING_UNLOCK_HEIGHT,
    LEGACY_SMALL_CONTRIBUTOR_THRESHOLD, MAX_CONTRIBUTORS_HF19, MAX_CONTRIBUTORS_V1,
    SMALL_CONTRIBUTOR_THRESHOLD_DEN, SMALL_CONTRIBUTOR_THRESHOLD_NUM,
    SMALL_CONTRIBUTOR_UNLOCK_TIMER, STAKING_REQUIREMENT_LOCK_BLOCKS_EXCESS, UNASSIGNED_SWARM_ID,
};
use super::swarm::{calc_swarm_changes, SwarmMap};
use super::verifier::verify_tx_state_change;
use crate::config::NetworkConfig;
use crate::error::{ServiceNodeError, ServiceNodeResult};
use crate::ports::outbound::{BlockchainReader, CryptoProvider, ReturnedStakes};
use shared_types::{
    Block, BlsPublicKey, HardFork, Hash, NewState, PublicKey, Transaction, TxType, NULL_PUBKEY,
};
use std::sync::Arc;
use tracing::{debug, error, info};

const BLACKLIST_ENTRY_VERSION: u8 = 1;

/// Collaborators available while a block is applied.
#[derive(Clone, Copy)]
pub struct TransitionContext<'a> {
    pub net: &'a NetworkConfig,
    pub crypto: &'a dyn CryptoProvider,
    pub blockchain: &'a dyn BlockchainReader,
    /// Past states, for quorums referenced by state changes
    pub history: HistoryView<'a>,
    /// This node's own key, for friendlier logs
    pub my_key: Option<PublicKey>,
}

impl TransitionContext<'_> {
    pub(super) fn is_me(&self, key: &PublicKey) -> bool {
        self.my_key.as_ref() == Some(key)
    }
}

/// Effects of a block outside the registry itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    /// Fresh registrations; any stored proof is stale
    pub registered: Vec<PublicKey>,
    pub decommissioned: Vec<PublicKey>,
    /// Recommissioned nodes with the block timestamp
    pub recommissioned: Vec<(PublicKey, u64)>,
    pub expired: Vec<(PublicKey, BlsPublicKey)>,
    pub returned_stakes: Vec<ReturnedStakes>,
}

/// Message signed by a locked contribution's key to request an unlock.
pub fn request_stake_unlock_hash(crypto: &dyn CryptoProvider, nonce: u32) -> Hash {
    let mut buffer = Vec::with_capacity(6 + 4);
    buffer.extend_from_slice(b"UNLOCK");
    buffer.extend_from_slice(&nonce.to_le_bytes());
    crypto.fast_hash(&buffer)
}

pub(super) fn log_node_event(is_me: bool, event: &str, key: &PublicKey) {
    if is_me {
        info!("[qc-18] {} for service node (yours): {}", event, hex::encode(key));
    } else {
        info!("[qc-18] {} for service node: {}", event, hex::encode(key));
    }
}

impl RegistryState {
    /// Advance this state by `block`, whose non-miner transactions are `txs`.
    pub fn update_from_block(
        &mut self,
        ctx: &TransitionContext<'_>,
        block: &Block,
        txs: &[Transaction],
    ) -> ServiceNodeResult<BlockOutcome> {
        if self.height + 1 != block.height {
            return Err(ServiceNodeError::NonSequentialBlock {
                expected: self.height + 1,
                actual: block.height,
            });
        }

        let hf = block.major_version;
        let block_height = block.height;
        self.height = block_height;
        self.block_hash = block.hash;
        self.quorums.clear();

        let mut outcome = BlockOutcome::default();
        let mut need_swarm_update = false;

        let winner = block.miner_tx.service_node_winner().unwrap_or(NULL_PUBKEY);
        if hf >= HardFork::PULSE {
            let entropy = get_pulse_entropy_for_next_block(
                ctx.blockchain,
                ctx.crypto,
                &block.prev_hash,
                block.pulse.round,
            );
            let quorum = generate_pulse_quorum(
                ctx.net.pulse_min_service_nodes,
                &winner,
                hf,
                &self.active_service_nodes_infos(),
                &entropy,
                block.pulse.round,
            );
            if is_complete_pulse_quorum(&quorum) {
                for (index, key) in quorum.validators.iter().enumerate() {
                    if let Some(info) = self.info_mut(key) {
                        info.pulse_sorter = PulseSorter {
                            last_height_validating_in_quorum: block_height,
                            quorum_index: index as u8,
                        };
                    }
                }
                self.quorums.set(QuorumType::Pulse, Some(Arc::new(quorum)));
            }
        }

        if hf >= HardFork::INFINITE_STAKING {
            self.key_image_blacklist
                .retain(|entry| block_height < entry.unlock_height);
        }

        for pubkey in self.get_expired_nodes(ctx, hf, block_height) {
            let Some(info) = self.service_nodes_infos.remove(&pubkey) else {
                continue;
            };
            if ctx.is_me(&pubkey) {
                info!(
                    "[qc-18] Service node expired (yours): {} at block height: {}",
                    hex::encode(pubkey),
                    block_height
                );
            } else {
                info!(
                    "[qc-18] Service node expired: {} at block height: {}",
                    hex::encode(pubkey),
                    block_height
                );
            }
            need_swarm_update |= info.is_active();
            outcome.expired.push((pubkey, info.bls_public_key));
        }

        if let Some(info) = self.info_mut(&winner) {
            info.last_reward_block_height = block_height;
            info.last_reward_transaction_index = u32::MAX;
        }

        let staking_tx_type = TxType::staking_type_for_hf(hf);
        for (index, tx) in txs.iter().enumerate() {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            if tx.tx_type == staking_tx_type {
                self.process_registration_tx(ctx, block, tx, index, &mut outcome);
                need_swarm_update |= self.process_contribution_tx(ctx, hf, tx, block_height, index);
                continue;
            }
            match tx.tx_type {
                TxType::StateChange => {
                    need_swarm_update |= self.process_state_change_tx(ctx, block, tx, &mut outcome);
                }
                TxType::KeyImageUnlock => {
                    self.process_key_image_unlock_tx(ctx, hf, block_height, tx);
                }
                // Bridge registrations join a swarm on the next rebalance.
                TxType::EthNewServiceNode => {
                    self.process_eth_registration_tx(ctx, block, tx, index, &mut outcome);
                }
                TxType::EthLeaveRequest => {
                    self.process_eth_unlock_tx(ctx, block_height, tx);
                }
                TxType::EthExit => {
                    self.process_eth_exit_tx(ctx, block_height, tx, &mut outcome);
                }
                TxType::EthDeregister => {
                    self.process_eth_deregister_tx(ctx, block_height, tx);
                }
                _ => {}
            }
        }

        let active = self.active_service_nodes_infos();
        if need_swarm_update {
            let mut seed_bytes = [0u8; 8];
            seed_bytes.copy_from_slice(&block.hash[..8]);
            let seed = u64::from_le_bytes(seed_bytes);

            let mut swarms = SwarmMap::new();
            for (key, info) in &active {
                swarms.entry(info.swarm_id).or_default().push(*key);
            }
            calc_swarm_changes(&mut swarms, seed);

            for (swarm_id, members) in swarms {
                for key in members {
                    if self.info(&key).is_some_and(|info| info.swarm_id != swarm_id) {
                        if let Some(info) = self.info_mut(&key) {
                            info.swarm_id = swarm_id;
                        }
                    }
                }
            }
        }

        generate_other_quorums(self, &active, ctx.net.network, hf)?;
        Ok(outcome)
    }

    /// Nodes whose stake lock ends at `block_height`.
    pub fn get_expired_nodes(
        &self,
        ctx: &TransitionContext<'_>,
        hf: HardFork,
        block_height: u64,
    ) -> Vec<PublicKey> {
        let lock_blocks = ctx.net.staking_lock_blocks;

        // HF9 expiry replays the registrations of the block one lock period back.
        if hf == HardFork::SERVICE_NODES {
            if block_height <= lock_blocks {
                return Vec::new();
            }
            let expired_height = block_height - lock_blocks;
            let Some(block) = ctx.blockchain.block_by_height(expired_height) else {
                error!(
                    "[qc-18] Failed to get historical block {} to find expired nodes in v9",
                    expired_height
                );
                return Vec::new();
            };
            if block.major_version < HardFork::SERVICE_NODES {
                return Vec::new();
            }
            return ctx
                .blockchain
                .block_transactions(&block)
                .iter()
                .filter_map(|tx| {
                    is_registration_tx(
                        ctx.crypto,
                        ctx.net,
                        HardFork::SERVICE_NODES,
                        tx,
                        block.timestamp,
                        expired_height,
                        0,
                    )
                    .ok()
                    .flatten()
                    .map(|(key, _)| key)
                })
                .collect();
        }

        self.service_nodes_infos
            .iter()
            .filter(|(_, info)| {
                if info.registration_hf_version >= HardFork::INFINITE_STAKING {
                    info.requested_unlock_height != KEY_IMAGE_AWAITING_UNLOCK_HEIGHT
                        && block_height > info.requested_unlock_height
                } else {
                    block_height
                        > info.registration_height
                            + lock_blocks
                            + STAKING_REQUIREMENT_LOCK_BLOCKS_EXCESS
                }
            })
            .map(|(key, _)| *key)
            .collect()
    }

    fn process_registration_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        block: &Block,
        tx: &Transaction,
        index: u32,
        outcome: &mut BlockOutcome,
    ) -> bool {
        let hf = block.major_version;
        let block_height = block.height;
        let (key, mut info) = match is_registration_tx(
            ctx.crypto,
            ctx.net,
            hf,
            tx,
            block.timestamp,
            block_height,
            index,
        ) {
            Ok(Some(found)) => found,
            Ok(None) => return false,
            Err(err) => {
                info!("[qc-18] {} (tx {})", err, hex::encode(tx.hash));
                return false;
            }
        };
        let key_hex = hex::encode(key);

        if hf >= HardFork::INFINITE_STAKING {
            // No grace period with infinite staking: re-registrations are ignored.
            if self.service_nodes_infos.contains_key(&key) {
                return false;
            }
            outcome.registered.push(key);
            if ctx.is_me(&key) {
                info!("[qc-18] Service node registered (yours): {} on height: {}", key_hex, block_height);
            } else {
                info!("[qc-18] New service node registered: {} on height: {}", key_hex, block_height);
            }
        } else {
            let mut during_grace_period = false;
            if let Some(old) = self.info(&key) {
                if hf < HardFork::BULLETPROOFS
                    || block_height < old.registration_height + ctx.net.staking_lock_blocks
                {
                    return false;
                }
                // Keeps its place in the reward queue.
                during_grace_period = true;
                info.last_reward_block_height = old.last_reward_block_height;
                info.last_reward_transaction_index = old.last_reward_transaction_index;
            }
            match (ctx.is_me(&key), during_grace_period) {
                (true, true) => info!(
                    "[qc-18] Service node re-registered (yours): {} at block height: {}",
                    key_hex, block_height
                ),
                (true, false) => info!(
                    "[qc-18] Service node registered (yours): {} at block height: {}",
                    key_hex, block_height
                ),
                _ => info!(
                    "[qc-18] New service node registered: {} at block height: {}",
                    key_hex, block_height
                ),
            }
        }

        self.service_nodes_infos.insert(key, Arc::new(info));
        true
    }

    /// Apply a stake to a registered, unfunded node. Returns true when the
    /// node became fully funded (and so joined the active set).
    fn process_contribution_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        hf: HardFork,
        tx: &Transaction,
        block_height: u64,
        index: u32,
    ) -> bool {
        if tx.service_node_pubkey().is_none() {
            return false;
        }
        let tx_hash = hex::encode(tx.hash);
        let Some(stake) =
            tx_get_staking_components_and_amounts(ctx.crypto, ctx.net, hf, tx, block_height)
        else {
            info!(
                "[qc-18] TX: Could not decode contribution for service node on height: {} for tx: {}",
                block_height, tx_hash
            );
            return false;
        };
        let pubkey = stake.service_node_pubkey;

        let Some(current) = self.info(&pubkey) else {
            info!(
                "[qc-18] TX: Contribution received for service node: {}, but could not be found in the service node list on height: {} for tx: {}\n This could mean that the service node was deregistered before the contribution was processed.",
                hex::encode(pubkey),
                block_height,
                tx_hash
            );
            return false;
        };
        if current.is_fully_funded() {
            info!(
                "[qc-18] TX: Service node: {} is already fully funded, but contribution received on height: {} for tx: {}",
                hex::encode(pubkey),
                block_height,
                tx_hash
            );
            return false;
        }

        let existing_contributions = current.total_num_locked_contributions();
        // Unfilled reservations of other contributors must stay open.
        let mut other_reservations = 0usize;
        let mut position = None;
        let mut contr_unfilled_reserved = 0u64;
        for (i, contributor) in current.contributors.iter().enumerate() {
            if contributor.address == stake.address {
                position = Some(i);
                contr_unfilled_reserved = contributor.reserved.saturating_sub(contributor.amount);
            } else if contributor.amount < contributor.reserved {
                other_reservations += 1;
            }
        }
        let new_contributor = position.is_none();

        if hf >= HardFork::PULSE && stake.locked_contributions.len() != 1 {
            info!("[qc-18] Ignoring staking tx: multi-output stakes are not permitted as of HF16");
            return false;
        }

        let too_many_contributions = if hf >= HardFork::REWARD_BATCHING {
            existing_contributions + other_reservations + 1 > MAX_CONTRIBUTORS_HF19
        } else if hf >= HardFork::PULSE {
            existing_contributions + other_reservations + 1 > MAX_CONTRIBUTORS_V1
        } else if hf >= HardFork::INFINITE_STAKING {
            existing_contributions + stake.locked_contributions.len() > MAX_CONTRIBUTORS_V1
        } else {
            new_contributor && current.contributors.len() >= MAX_CONTRIBUTORS_V1
        };
        if too_many_contributions {
            info!(
                "[qc-18] TX: Already hit the max number of contributions: {} for contributor: {} on height: {} for tx: {}",
                max_contributors_for_hf(hf),
                hex::encode(stake.address.spend_public_key),
                block_height,
                tx_hash
            );
            return false;
        }

        let min_contribution = if !new_contributor && hf < HardFork::INFINITE_STAKING {
            1
        } else if hf < HardFork::PULSE {
            get_min_node_contribution(
                hf,
                current.staking_requirement,
                current.total_reserved,
                existing_contributions,
            )
        } else if contr_unfilled_reserved > 0 {
            // A reserved spot has to be filled in one go.
            contr_unfilled_reserved
        } else {
            get_min_node_contribution(
                hf,
                current.staking_requirement,
                current.total_reserved,
                existing_contributions + other_reservations,
            )
        };
        if stake.transferred < min_contribution {
            info!(
                "[qc-18] TX: Amount {} did not meet min {} for service node: {} on height: {} for tx: {}",
                stake.transferred,
                min_contribution,
                hex::encode(pubkey),
                block_height,
                tx_hash
            );
            return false;
        }

        let max_contribution = get_max_node_contribution(
            hf,
            current.staking_requirement,
            current.total_reserved.saturating_sub(contr_unfilled_reserved),
        );
        if stake.transferred > max_contribution {
            info!(
                "[qc-18] TX: Amount {} is too large (max {}).  This is probably a result of competing stakes.",
                stake.transferred, max_contribution
            );
            return false;
        }

        let Some(info) = self.info_mut(&pubkey) else {
            return false;
        };
        let position = position.unwrap_or_else(|| {
            info.contributors.push(Contributor::new(0, stake.address));
            info.contributors.len() - 1
        });

        // Reserved may not be pushed beyond the staking requirement.
        let can_increase_reserved_by = info.staking_requirement.saturating_sub(info.total_reserved);
        let (transferred, reserved_increase) = {
            let contributor = &mut info.contributors[position];
            let max_amount = contributor.reserved + can_increase_reserved_by;
            let transferred = stake
                .transferred
                .min(max_amount.saturating_sub(contributor.amount));
            contributor.amount += transferred;

            let mut reserved_increase = 0;
            if contributor.amount > contributor.reserved {
                reserved_increase = contributor.amount - contributor.reserved;
                contributor.reserved = contributor.amount;
            }
            if hf >= HardFork::INFINITE_STAKING {
                contributor
                    .locked_contributions
                    .extend(stake.locked_contributions.iter().copied());
            }
            (transferred, reserved_increase)
        };

        info.total_contributed += transferred;
        info.total_reserved += reserved_increase;
        info.last_reward_block_height = block_height;
        info.last_reward_transaction_index = index;

        info!(
            "[qc-18] Contribution of {} received for service node {}",
            transferred,
            hex::encode(pubkey)
        );
        if info.is_fully_funded() {
            info.active_since_height = block_height as i64;
            return true;
        }
        false
    }

    /// Apply a quorum-voted state change. Returns true when the active set changed.
    fn process_state_change_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        block: &Block,
        tx: &Transaction,
        outcome: &mut BlockOutcome,
    ) -> bool {
        let hf = block.major_version;
        let block_height = block.height;
        let tx_hash = hex::encode(tx.hash);

        let Some(state_change) = tx.state_change() else {
            error!(
                "[qc-18] Transaction: {}, did not have valid state change data in tx extra rejecting malformed tx",
                tx_hash
            );
            return false;
        };

        let Some(stored) = ctx.history.find_state(state_change.block_height) else {
            error!(
                "[qc-18] Transaction: {} in block {} {} references quorum height but that height is not stored!",
                tx_hash,
                block_height,
                hex::encode(block.hash)
            );
            return false;
        };

        let mut quorum = None;
        let candidates =
            std::iter::once(stored).chain(ctx.history.alt_states_at(state_change.block_height));
        for state in candidates {
            let Some(candidate) = state.quorums.get(QuorumType::Obligations) else {
                continue;
            };
            match verify_tx_state_change(ctx.crypto, state_change, block_height, &candidate) {
                Ok(()) => {
                    quorum = Some(candidate);
                    break;
                }
                Err(reason) => debug!("[qc-18] State change in tx {} did not verify: {}", tx_hash, reason),
            }
        }
        let Some(quorum) = quorum else {
            error!(
                "[qc-18] Could not get a quorum that could completely validate the votes from state change in tx: {}, skipping transaction",
                tx_hash
            );
            return false;
        };

        let Some(key) = quorum
            .workers
            .get(state_change.service_node_index as usize)
            .copied()
        else {
            error!(
                "[qc-18] Retrieving the public key from state change in tx: {} failed",
                tx_hash
            );
            return false;
        };
        if !self.service_nodes_infos.contains_key(&key) {
            debug!(
                "[qc-18] Received state change tx for non-registered service node {} (perhaps a delayed tx?)",
                hex::encode(key)
            );
            return false;
        }
        let is_me = ctx.is_me(&key);

        match state_change.state {
            NewState::Deregister => {
                log_node_event(is_me, "Deregistration", &key);
                let Some(info) = self.service_nodes_infos.remove(&key) else {
                    return false;
                };
                if hf >= HardFork::INFINITE_STAKING {
                    let unlock_height = block_height + ctx.net.staking_lock_blocks;
                    let locked = info
                        .contributors
                        .iter()
                        .flat_map(|contributor| contributor.locked_contributions.iter());
                    for contribution in locked {
                        self.key_image_blacklist.push(KeyImageBlacklistEntry {
                            version: BLACKLIST_ENTRY_VERSION,
                            key_image: contribution.key_image,
                            unlock_height,
                            amount: contribution.amount,
                        });
                    }
                }
                true
            }
            NewState::Decommission => {
                if hf < HardFork::CHECKPOINTING {
                    error!("[qc-18] Invalid decommission transaction seen before network v12");
                    return false;
                }
                let Some(info) = self.info_mut(&key) else {
                    return false;
                };
                if info.is_decommissioned() {
                    debug!(
                        "[qc-18] Received decommission tx for already-decommissioned service node {}; ignoring",
                        hex::encode(key)
                    );
                    return false;
                }
                log_node_event(is_me, "Temporary decommission", &key);

                info.active_since_height = -info.active_since_height;
                info.last_decommission_height = block_height;
                info.last_decommission_reason_consensus_all = state_change.reason_consensus_all;
                info.last_decommission_reason_consensus_any = state_change.reason_consensus_any;
                info.decommission_count += 1;
                if hf >= HardFork::ENFORCE_CHECKPOINTS {
                    // Rejoins a swarm when recommissioned.
                    info.swarm_id = UNASSIGNED_SWARM_ID;
                }
                outcome.decommissioned.push(key);
                true
            }
            NewState::Recommission => {
                if hf < HardFork::CHECKPOINTING {
                    error!("[qc-18] Invalid recommission transaction seen before network v12");
                    return false;
                }
                let Some(info) = self.info_mut(&key) else {
                    return false;
                };
                if !info.is_decommissioned() {
                    debug!(
                        "[qc-18] Received recommission tx for already-active service node {}; ignoring",
                        hex::encode(key)
                    );
                    return false;
                }
                log_node_event(is_me, "Recommission", &key);

                let blocks_down = block_height.saturating_sub(info.last_decommission_height);
                info.recommission_credit = credit_after_recommission(info, blocks_down);
                info.active_since_height = block_height as i64;
                info.last_reward_block_height = block_height;
                info.last_reward_transaction_index = u32::MAX;
                outcome.recommissioned.push((key, block.timestamp));
                true
            }
            NewState::IpChangePenalty => {
                if hf < HardFork::CHECKPOINTING {
                    error!("[qc-18] Invalid ip_change_penalty transaction seen before network v12");
                    return false;
                }
                let Some(info) = self.info_mut(&key) else {
                    return false;
                };
                if info.is_decommissioned() {
                    debug!(
                        "[qc-18] Received reset position tx for service node {} but it is already decommissioned; ignoring",
                        hex::encode(key)
                    );
                    return false;
                }
                log_node_event(is_me, "Reward position reset", &key);

                info.last_reward_block_height = block_height;
                info.last_reward_transaction_index = u32::MAX;
                info.last_ip_change_height = block_height;
                true
            }
        }
    }

    fn process_key_image_unlock_tx(
        &mut self,
        ctx: &TransitionContext<'_>,
        hf: HardFork,
        block_height: u64,
        tx: &Transaction,
    ) -> bool {
        let Some(pubkey) = tx.service_node_pubkey() else {
            return false;
        };
        let Some(node) = self.info(&pubkey) else {
            return false;
        };
        let tx_hash = hex::encode(tx.hash);

        if node.requested_unlock_height != KEY_IMAGE_AWAITING_UNLOCK_HEIGHT {
            info!(
                "[qc-18] Unlock TX: Node already requested an unlock at height: {} rejected on height: {} for tx: {}",
                node.requested_unlock_height, block_height, tx_hash
            );
            return false;
        }
        let Some(unlock) = tx.key_image_unlock() else {
            info!(
                "[qc-18] Unlock TX: Didn't have key image unlock in the tx_extra, rejected on height: {} for tx: {}",
                block_height, tx_hash
            );
            return false;
        };

        let unlock_height =
            get_locked_key_image_unlock_height(ctx.net, node.registration_height, block_height);
        let small_contributor_threshold = mul128_div64(
            ctx.net.staking_requirement,
            SMALL_CONTRIBUTOR_THRESHOLD_NUM,
            SMALL_CONTRIBUTOR_THRESHOLD_DEN,
        );
        let Some(contribution) = node
            .contributors
            .iter()
            .flat_map(|contributor| contributor.locked_contributions.iter())
            .find(|contribution| contribution.key_image == unlock.key_image)
            .copied()
        else {
            return false;
        };

        let too_early =
            block_height.saturating_sub(node.registration_height) < SMALL_CONTRIBUTOR_UNLOCK_TIMER;
        let small = if hf >= HardFork::ETH_BLS {
            contribution.amount < small_contributor_threshold
        } else if hf == HardFork::REWARD_BATCHING {
            contribution.amount < LEGACY_SMALL_CONTRIBUTOR_THRESHOLD
        } else {
            false
        };
        if small && too_early {
            info!(
                "[qc-18] Unlock TX: small contributor trying to unlock node before {} blocks have passed, rejected on height: {} for tx: {}",
                SMALL_CONTRIBUTOR_UNLOCK_TIMER, block_height, tx_hash
            );
            return false;
        }

        let hash = request_stake_unlock_hash(ctx.crypto, unlock.nonce);
        if !ctx
            .crypto
            .verify_signature(&hash, &contribution.key_image_pub_key, &unlock.signature)
        {
            info!(
                "[qc-18] Unlock TX: Couldn't verify key image unlock in the tx_extra, rejected on height: {} for tx: {}",
                block_height, tx_hash
            );
            return false;
        }

        if let Some(info) = self.info_mut(&pubkey) {
            info.requested_unlock_height = unlock_height;
        }
        true
    }

    /// HF19 only: whether `tx` unlocks a small contribution before its timer ran out.
    pub fn is_premature_unlock(
        &self,
        net: &NetworkConfig,
        hf: HardFork,
        block_height: u64,
        tx: &Transaction,
    ) -> bool {
        if hf != HardFork::REWARD_BATCHING {
            return false;
        }
        let (Some(pubkey), Some(unlock)) = (tx.service_node_pubkey(), tx.key_image_unlock()) else {
            return false;
        };
        let Some(node) = self.info(&pubkey) else {
            return false;
        };

        let threshold = mul128_div64(
            net.staking_requirement,
            SMALL_CONTRIBUTOR_THRESHOLD_NUM,
            SMALL_CONTRIBUTOR_THRESHOLD_DEN,
        );
        node.contributors
            .iter()
            .flat_map(|contributor| contributor.locked_contributions.iter())
            .find(|contribution| contribution.key_image == unlock.key_image)
            .is_some_and(|contribution| {
                contribution.amount < threshold
                    && block_height.saturating_sub(node.registration_height)
                        < SMALL_CONTRIBUTOR_UNLOCK_TIMER
            })
    }
}
