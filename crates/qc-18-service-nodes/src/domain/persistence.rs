//! # Persistence
//!
//! The registry is stored as two bincode blobs:
//!
//! | Blob | Contents | Written |
//! |------|----------|---------|
//! | long-term | every archived state | when the archive or data version changed |
//! | short-term | old quorums, the oldest history states, the head | every store |
//!
//! Each stored state carries a version. Version 0 predates the block hash,
//! which is backfilled from the chain on load. Each `ServiceNodeInfo`
//! carries its own `InfoVersion` and is migrated field by field.

use super::history::{short_term_state_cull_height, HistoryStore, QuorumsByHeight};
use super::info::{InfoVersion, ServiceNodeInfo};
use super::quorum::{Quorum, QuorumManager, QuorumType};
use super::registry::{KeyImageBlacklistEntry, RegistryState};
use super::rules::{DECOMMISSION_INITIAL_CREDIT, VOTE_LIFETIME, VOTE_OR_TX_VERIFY_HEIGHT_BUFFER};
use crate::error::PersistenceError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared_types::{HardFork, Hash, PublicKey, NULL_HASH};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

/// Layout version of the blob container.
pub const DATA_VERSION: u8 = 1;
/// Stored state without a block hash.
pub const STATE_VERSION_NO_BLOCK_HASH: u8 = 0;
pub const STATE_VERSION: u8 = 1;

/// Quorums of one height, one optional slot per `QuorumType`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumForSerialization {
    pub version: u8,
    pub height: u64,
    pub quorums: Vec<Option<Quorum>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSerialized {
    pub version: u8,
    pub height: u64,
    pub infos: Vec<(PublicKey, ServiceNodeInfo)>,
    pub key_image_blacklist: Vec<KeyImageBlacklistEntry>,
    pub quorums: QuorumForSerialization,
    pub only_stored_quorums: bool,
    pub block_hash: Hash,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataForSerialization {
    pub version: u8,
    pub quorum_states: Vec<QuorumForSerialization>,
    pub states: Vec<StateSerialized>,
}

/// Chain lookups needed to upgrade old records.
pub struct LoadContext<'a> {
    pub hard_fork_at: &'a dyn Fn(u64) -> HardFork,
    pub block_hash_at: &'a dyn Fn(u64) -> Option<Hash>,
}

// =============================================================================
// ENCODING
// =============================================================================

pub fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, PersistenceError> {
    bincode::serialize(value).map_err(|e| PersistenceError::Serialization {
        what,
        reason: e.to_string(),
    })
}

pub fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, PersistenceError> {
    bincode::deserialize(bytes).map_err(|e| PersistenceError::Deserialization {
        what,
        reason: e.to_string(),
    })
}

// =============================================================================
// STATE <-> SERIALIZED
// =============================================================================

pub fn serialize_quorums(height: u64, quorums: &QuorumManager) -> QuorumForSerialization {
    QuorumForSerialization {
        version: 0,
        height,
        quorums: QuorumType::ALL
            .iter()
            .map(|&quorum_type| quorums.get(quorum_type).map(|quorum| (*quorum).clone()))
            .collect(),
    }
}

pub fn deserialize_quorums(source: &QuorumForSerialization) -> QuorumManager {
    let mut result = QuorumManager::default();
    for (&quorum_type, quorum) in QuorumType::ALL.iter().zip(&source.quorums) {
        result.set(quorum_type, quorum.clone().map(Arc::new));
    }
    result
}

pub fn serialize_state(state: &RegistryState, only_quorums: bool) -> StateSerialized {
    let mut result = StateSerialized {
        version: STATE_VERSION,
        height: state.height,
        quorums: serialize_quorums(state.height, &state.quorums),
        only_stored_quorums: state.only_stored_quorums || only_quorums,
        ..StateSerialized::default()
    };
    if only_quorums {
        return result;
    }
    result.infos = state
        .service_nodes_infos
        .iter()
        .map(|(key, info)| (*key, (**info).clone()))
        .collect();
    result.key_image_blacklist = state.key_image_blacklist.clone();
    result.block_hash = state.block_hash;
    result
}

/// Bring a stored entry up to `InfoVersion::CURRENT`.
pub fn migrate_info(info: &mut ServiceNodeInfo, hard_fork_at: &dyn Fn(u64) -> HardFork) {
    if info.version < InfoVersion::V1AddRegistrationHf {
        info.registration_hf_version = hard_fork_at(info.registration_height);
        info.version = InfoVersion::V1AddRegistrationHf;
    }
    if info.version < InfoVersion::V4NoProofs {
        // Proof data now lives in its own records and is refilled by new proofs.
        info.version = InfoVersion::V4NoProofs;
    }
    if info.version < InfoVersion::V5PulseRecommCredit {
        // Older records only knew "never recommissioned" (initial credit) or 0.
        let first_or_no_decommission =
            info.decommission_count <= u32::from(info.is_decommissioned());
        info.recommission_credit = if first_or_no_decommission {
            DECOMMISSION_INITIAL_CREDIT
        } else {
            0
        };
        info.pulse_sorter.last_height_validating_in_quorum = info.last_reward_block_height;
        info.version = InfoVersion::V5PulseRecommCredit;
    }
    if info.version < InfoVersion::V6ReassignSortKeys {
        info.pulse_sorter = Default::default();
        info.version = InfoVersion::V6ReassignSortKeys;
    }
    if info.version < InfoVersion::V7DecommissionReason {
        info.version = InfoVersion::V7DecommissionReason;
    }
}

pub fn deserialize_state(source: StateSerialized, ctx: &LoadContext<'_>) -> RegistryState {
    let mut block_hash = source.block_hash;
    if source.version == STATE_VERSION_NO_BLOCK_HASH || block_hash == NULL_HASH {
        block_hash = (ctx.block_hash_at)(source.height).unwrap_or(NULL_HASH);
    }

    let service_nodes_infos: BTreeMap<_, _> = source
        .infos
        .into_iter()
        .map(|(key, mut info)| {
            migrate_info(&mut info, ctx.hard_fork_at);
            (key, Arc::new(info))
        })
        .collect();

    RegistryState {
        height: source.height,
        block_hash,
        service_nodes_infos,
        key_image_blacklist: source.key_image_blacklist,
        quorums: deserialize_quorums(&source.quorums),
        only_stored_quorums: source.only_stored_quorums,
    }
}

// =============================================================================
// BLOBS
// =============================================================================

/// Highest history state stored in the short-term blob. States below it are
/// kept only for the quorums that votes may still reference.
pub fn max_short_term_height(head_height: u64) -> u64 {
    short_term_state_cull_height(head_height.saturating_sub(1))
        + VOTE_LIFETIME
        + VOTE_OR_TX_VERIFY_HEIGHT_BUFFER
}

pub fn build_long_term(store: &HistoryStore) -> DataForSerialization {
    DataForSerialization {
        version: DATA_VERSION,
        quorum_states: Vec::new(),
        states: store
            .state_archive
            .values()
            .map(|state| serialize_state(state, false))
            .collect(),
    }
}

pub fn build_short_term(store: &HistoryStore, head: &RegistryState) -> DataForSerialization {
    let quorum_states = store
        .old_quorum_states
        .iter()
        .map(|entry| serialize_quorums(entry.height, &entry.quorums))
        .collect();

    let max_height = max_short_term_height(head.height);
    let mut states: Vec<StateSerialized> = store
        .state_history
        .range(..=max_height)
        .map(|(&height, state)| serialize_state(state, height < max_height))
        .collect();
    states.push(serialize_state(head, false));

    DataForSerialization {
        version: DATA_VERSION,
        quorum_states,
        states,
    }
}

/// Registry rebuilt from stored blobs.
#[derive(Debug)]
pub struct Restored {
    pub head: RegistryState,
    pub history: HistoryStore,
}

/// Rebuild the head and history tiers. Old quorums below
/// `current_height - store_quorum_history` are dropped.
pub fn restore(
    long_term: Option<DataForSerialization>,
    short_term: DataForSerialization,
    ctx: &LoadContext<'_>,
    current_height: u64,
    store_quorum_history: u64,
) -> Result<Restored, PersistenceError> {
    let mut history = HistoryStore::new(store_quorum_history);

    if let Some(long_term) = long_term {
        for state in long_term.states {
            let state = deserialize_state(state, ctx);
            history.state_archive.insert(state.height, state);
        }
    }

    let from_height = current_height.saturating_sub(history.store_quorum_history);
    let mut old_quorum_states = VecDeque::new();
    let mut last_loaded: Option<u64> = None;
    for entry in short_term
        .quorum_states
        .iter()
        .filter(|entry| entry.height >= from_height)
    {
        if last_loaded.is_some_and(|last| entry.height <= last) {
            warn!("[qc-18] Serialised quorums are not stored in ascending order by height");
            return Err(PersistenceError::Corrupt {
                reason: "old quorum states are not in ascending height order".into(),
            });
        }
        last_loaded = Some(entry.height);
        old_quorum_states.push_back(QuorumsByHeight {
            height: entry.height,
            quorums: deserialize_quorums(entry),
        });
    }
    history.old_quorum_states = old_quorum_states;

    let mut states = short_term.states;
    let head = match states.pop() {
        None => {
            return Err(PersistenceError::Corrupt {
                reason: "short-term data holds no states".into(),
            })
        }
        Some(head) if head.only_stored_quorums => {
            warn!("[qc-18] Unexpected last serialized state only has quorums loaded");
            return Err(PersistenceError::Corrupt {
                reason: "head state only has quorums stored".into(),
            });
        }
        Some(head) => deserialize_state(head, ctx),
    };

    for state in states {
        let state = deserialize_state(state, ctx);
        history.state_history.insert(state.height, state);
    }

    Ok(Restored { head, history })
}
