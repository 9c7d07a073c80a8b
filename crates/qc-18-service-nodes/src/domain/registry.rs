//! # Registry State
//!
//! A `RegistryState` is the registry as of one height: every registered node,
//! the key-image blacklist and the quorums computed for that height. States
//! are cloned per block; the node map holds `Arc<ServiceNodeInfo>` so a clone
//! shares every entry with its parent until an entry is written.
//!
//! ## Iteration order
//!
//! All filtered views are ordered by raw public key bytes. Quorum selection
//! shuffles these lists, so the order has to be identical on every node.

use super::info::ServiceNodeInfo;
use super::quorum::QuorumManager;
use crate::config::NetworkConfig;
use serde::{Deserialize, Serialize};
use shared_types::{Hash, KeyImage, PublicKey, NULL_HASH, NULL_PUBKEY};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared handle to a node entry.
pub type InfoPtr = Arc<ServiceNodeInfo>;

/// Stake locked out of circulation after a deregistration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyImageBlacklistEntry {
    pub version: u8,
    pub key_image: KeyImage,
    pub unlock_height: u64,
    pub amount: u64,
}

/// Next node owed a reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLeader {
    pub key: PublicKey,
    pub last_reward_height: u64,
    pub last_reward_transaction_index: u32,
}

impl BlockLeader {
    pub fn null() -> Self {
        Self {
            key: NULL_PUBKEY,
            last_reward_height: 0,
            last_reward_transaction_index: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.key == NULL_PUBKEY
    }
}

/// Registry snapshot at one height.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryState {
    pub height: u64,
    pub block_hash: Hash,
    pub service_nodes_infos: BTreeMap<PublicKey, InfoPtr>,
    pub key_image_blacklist: Vec<KeyImageBlacklistEntry>,
    pub quorums: QuorumManager,
    /// Registry map and blacklist were stripped; only quorums remain
    pub only_stored_quorums: bool,
}

impl RegistryState {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            block_hash: NULL_HASH,
            ..Self::default()
        }
    }

    /// Copy keeping only what is needed to answer quorum lookups.
    pub fn quorum_only(&self) -> Self {
        Self {
            height: self.height,
            block_hash: self.block_hash,
            service_nodes_infos: BTreeMap::new(),
            key_image_blacklist: Vec::new(),
            quorums: self.quorums.clone(),
            only_stored_quorums: true,
        }
    }

    pub fn info(&self, pubkey: &PublicKey) -> Option<&InfoPtr> {
        self.service_nodes_infos.get(pubkey)
    }

    /// Writable entry; clones it first if another snapshot shares it.
    pub fn info_mut(&mut self, pubkey: &PublicKey) -> Option<&mut ServiceNodeInfo> {
        self.service_nodes_infos.get_mut(pubkey).map(Arc::make_mut)
    }

    pub fn is_service_node(&self, pubkey: &PublicKey, require_active: bool) -> bool {
        self.service_nodes_infos
            .get(pubkey)
            .is_some_and(|info| !require_active || info.is_active())
    }

    fn sort_and_filter<F>(&self, filter: F) -> Vec<(PublicKey, InfoPtr)>
    where
        F: Fn(&ServiceNodeInfo) -> bool,
    {
        // BTreeMap iterates in key byte order already.
        self.service_nodes_infos
            .iter()
            .filter(|&(_, info)| filter(info.as_ref()))
            .map(|(key, info)| (*key, Arc::clone(info)))
            .collect()
    }

    pub fn active_service_nodes_infos(&self) -> Vec<(PublicKey, InfoPtr)> {
        self.sort_and_filter(ServiceNodeInfo::is_active)
    }

    pub fn decommissioned_service_nodes_infos(&self) -> Vec<(PublicKey, InfoPtr)> {
        self.sort_and_filter(|info| info.is_decommissioned() && info.is_fully_funded())
    }

    pub fn payable_service_nodes_infos(
        &self,
        height: u64,
        net: &NetworkConfig,
    ) -> Vec<(PublicKey, InfoPtr)> {
        self.sort_and_filter(|info| info.is_payable(height, net))
    }

    /// Active node with the oldest `(last_reward_height, tx_index)`, ties by key.
    pub fn get_block_leader(&self) -> BlockLeader {
        self.service_nodes_infos
            .iter()
            .filter(|(_, info)| info.is_active())
            .min_by_key(|(key, info)| {
                (
                    info.last_reward_block_height,
                    info.last_reward_transaction_index,
                    **key,
                )
            })
            .map(|(key, info)| BlockLeader {
                key: *key,
                last_reward_height: info.last_reward_block_height,
                last_reward_transaction_index: info.last_reward_transaction_index,
            })
            .unwrap_or_else(BlockLeader::null)
    }

    /// Blacklist entry and the height it unlocks at, if `key_image` is locked.
    pub fn blacklisted_key_image(&self, key_image: &KeyImage) -> Option<&KeyImageBlacklistEntry> {
        self.key_image_blacklist
            .iter()
            .find(|entry| entry.key_image == *key_image)
    }

    /// Find the node and contribution locking `key_image`.
    pub fn find_locked_key_image(
        &self,
        key_image: &KeyImage,
    ) -> Option<(PublicKey, u64, super::info::LockedContribution)> {
        self.service_nodes_infos.iter().find_map(|(key, info)| {
            info.contributors
                .iter()
                .flat_map(|contributor| contributor.locked_contributions.iter())
                .find(|locked| locked.key_image == *key_image)
                .map(|locked| (*key, info.requested_unlock_height, *locked))
        })
    }
}
