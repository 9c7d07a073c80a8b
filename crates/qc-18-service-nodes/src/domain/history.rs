//! # History / Archive Manager
//!
//! Three tiers of past registry states:
//!
//! | Tier | Contents | Retention |
//! |------|----------|-----------|
//! | `state_history` | full states by height | `DEFAULT_SHORT_TERM_STATE_HISTORY` blocks |
//! | `state_archive` | every `STORE_LONG_TERM_STATE_INTERVAL`th state in full, plus quorum-only states just before each interval | unbounded |
//! | `old_quorum_states` | quorums only | `store_quorum_history` entries |
//!
//! Alt-chain states are kept separately, keyed by block hash, and dropped
//! once they fall below the cull height.

use super::quorum::{Quorum, QuorumManager, QuorumType};
use super::registry::RegistryState;
use super::rules::{
    DEFAULT_SHORT_TERM_STATE_HISTORY, REORG_SAFETY_BUFFER_BLOCKS_POST_HF12,
    STORE_LONG_TERM_STATE_INTERVAL, VOTE_LIFETIME, VOTE_OR_TX_VERIFY_HEIGHT_BUFFER,
};
use shared_types::Hash;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Lowest height kept in short-term history after adding `block_height`.
pub fn short_term_state_cull_height(block_height: u64) -> u64 {
    block_height.saturating_sub(DEFAULT_SHORT_TERM_STATE_HISTORY)
}

/// Checkpoint quorums are looked up `REORG_SAFETY_BUFFER_BLOCKS_POST_HF12` behind.
pub fn offset_testing_quorum_height(quorum_type: QuorumType, height: u64) -> u64 {
    if quorum_type == QuorumType::Checkpointing {
        height.saturating_sub(REORG_SAFETY_BUFFER_BLOCKS_POST_HF12)
    } else {
        height
    }
}

/// Quorums retained after their state was culled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumsByHeight {
    pub height: u64,
    pub quorums: QuorumManager,
}

/// Outcome of rewinding to a detached height.
#[derive(Debug)]
pub enum Rewind {
    /// Exact state found in short-term history
    Restored(RegistryState),
    /// Nearest full archive sample; blocks above it must be replayed
    FromArchive(RegistryState),
    /// Nothing usable; rebuild from scratch
    Reinitialise,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryStore {
    pub state_history: BTreeMap<u64, RegistryState>,
    pub state_archive: BTreeMap<u64, RegistryState>,
    pub alt_states: HashMap<Hash, RegistryState>,
    pub old_quorum_states: VecDeque<QuorumsByHeight>,
    pub store_quorum_history: u64,
    /// Archive changed since the last long-term store
    pub state_added_to_archive: bool,
}

impl HistoryStore {
    pub fn new(store_quorum_history: u64) -> Self {
        let mut store = Self::default();
        store.set_quorum_history_storage(store_quorum_history);
        store
    }

    /// `1` means keep everything.
    pub fn set_quorum_history_storage(&mut self, size: u64) {
        self.store_quorum_history = if size == 1 { u64::MAX } else { size };
    }

    pub fn clear(&mut self) {
        self.state_history.clear();
        self.state_archive.clear();
        self.alt_states.clear();
        self.old_quorum_states.clear();
    }

    pub fn state_history_exists(&self, height: u64) -> bool {
        self.state_history.contains_key(&height)
    }

    /// Retire states below the cull height for `block_height`, then record
    /// `previous` (the head before that block) in short-term history.
    pub fn cull_and_push(&mut self, block_height: u64, previous: RegistryState) {
        let cull_height = short_term_state_cull_height(block_height);

        let retained = self.state_history.split_off(&(cull_height + 1));
        let culled = std::mem::replace(&mut self.state_history, retained);
        for (height, state) in culled {
            if self.store_quorum_history > 0 {
                self.old_quorum_states.push_back(QuorumsByHeight {
                    height,
                    quorums: state.quorums.clone(),
                });
            }

            let next_long_term =
                (height / STORE_LONG_TERM_STATE_INTERVAL + 1) * STORE_LONG_TERM_STATE_INTERVAL;
            let need_quorum_for_future_states =
                next_long_term - height <= VOTE_LIFETIME + VOTE_OR_TX_VERIFY_HEIGHT_BUFFER;
            if height % STORE_LONG_TERM_STATE_INTERVAL == 0 || need_quorum_for_future_states {
                self.state_added_to_archive = true;
                let state = if need_quorum_for_future_states {
                    state.quorum_only()
                } else {
                    state
                };
                self.state_archive.insert(height, state);
            }
        }

        let limit = usize::try_from(self.store_quorum_history).unwrap_or(usize::MAX);
        while self.old_quorum_states.len() > limit {
            self.old_quorum_states.pop_front();
        }

        self.alt_states.retain(|_, state| state.height >= cull_height);
        self.state_history.insert(previous.height, previous);
    }

    /// Drop everything above `revert_to_height` and hand back the state to resume from.
    pub fn rewind_to(&mut self, revert_to_height: u64) -> Rewind {
        let usable = |state: Option<&RegistryState>| state.is_some_and(|s| !s.only_stored_quorums);

        if usable(self.state_history.get(&revert_to_height)) {
            let _ = self.state_history.split_off(&(revert_to_height + 1));
            if let Some((_, state)) = self.state_history.pop_last() {
                return Rewind::Restored(state);
            }
        }

        let prev_interval = revert_to_height - revert_to_height % STORE_LONG_TERM_STATE_INTERVAL;
        if usable(self.state_archive.get(&prev_interval)) {
            self.state_history.clear();
            let _ = self.state_archive.split_off(&(prev_interval + 1));
            if let Some((_, state)) = self.state_archive.pop_last() {
                return Rewind::FromArchive(state);
            }
        }

        self.state_history.clear();
        self.state_archive.clear();
        Rewind::Reinitialise
    }

    fn old_quorums(&self, height: u64) -> Option<&QuorumManager> {
        let index = self
            .old_quorum_states
            .partition_point(|entry| entry.height < height);
        self.old_quorum_states
            .get(index)
            .filter(|entry| entry.height == height)
            .map(|entry| &entry.quorums)
    }
}

/// Read-only lookup across the head, its parent and every stored tier.
#[derive(Clone, Copy)]
pub struct HistoryView<'a> {
    pub head: &'a RegistryState,
    /// Previous head while a block is being applied; not yet in `store`
    pub parent: Option<&'a RegistryState>,
    pub store: &'a HistoryStore,
    /// Whether alt-chain states take part in lookups
    pub include_alt: bool,
}

impl<'a> HistoryView<'a> {
    pub fn new(head: &'a RegistryState, store: &'a HistoryStore) -> Self {
        Self {
            head,
            parent: None,
            store,
            include_alt: false,
        }
    }

    pub fn with_parent(mut self, parent: &'a RegistryState) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.include_alt = true;
        self
    }

    /// State at exactly `height`, possibly quorum-only.
    pub fn find_state(&self, height: u64) -> Option<&'a RegistryState> {
        if self.head.height == height {
            return Some(self.head);
        }
        if let Some(parent) = self.parent.filter(|parent| parent.height == height) {
            return Some(parent);
        }
        self.store
            .state_history
            .get(&height)
            .or_else(|| self.store.state_archive.get(&height))
    }

    pub fn find_quorums(&self, height: u64, include_old: bool) -> Option<&'a QuorumManager> {
        self.find_state(height)
            .map(|state| &state.quorums)
            .or_else(|| include_old.then(|| self.store.old_quorums(height)).flatten())
    }

    pub fn alt_states_at(&self, height: u64) -> impl Iterator<Item = &'a RegistryState> + 'a {
        let include = self.include_alt;
        self.store
            .alt_states
            .values()
            .filter(move |state| include && state.height == height)
    }

    /// Quorum of `quorum_type` for `height`. Alt-chain quorums for the same
    /// height are appended to `alt_quorums` when requested.
    pub fn get_quorum(
        &self,
        quorum_type: QuorumType,
        height: u64,
        include_old: bool,
        alt_quorums: Option<&mut Vec<Arc<Quorum>>>,
    ) -> Option<Arc<Quorum>> {
        let height = offset_testing_quorum_height(quorum_type, height);
        let quorums = self.find_quorums(height, include_old);

        if let Some(alt_quorums) = alt_quorums {
            for state in self.store.alt_states.values() {
                if state.height == height {
                    if let Some(quorum) = state.quorums.get(quorum_type) {
                        alt_quorums.push(quorum);
                    }
                }
            }
        }

        quorums.and_then(|quorums| quorums.get(quorum_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(height: u64) -> RegistryState {
        let mut state = RegistryState::new(height);
        state.block_hash = [height as u8; 32];
        state.quorums.set(
            QuorumType::Obligations,
            Some(Arc::new(Quorum {
                validators: vec![[height as u8; 32]],
                workers: Vec::new(),
            })),
        );
        state
    }

    fn filled_store(up_to: u64, store_quorum_history: u64) -> (HistoryStore, RegistryState) {
        let mut store = HistoryStore::new(store_quorum_history);
        let mut head = state_at(0);
        for height in 1..=up_to {
            let next = state_at(height);
            store.cull_and_push(height, std::mem::replace(&mut head, next));
        }
        (store, head)
    }

    #[test]
    fn test_cull_height() {
        assert_eq!(short_term_state_cull_height(100), 0);
        assert_eq!(short_term_state_cull_height(1_000), 640);
    }

    #[test]
    fn test_checkpoint_height_offset() {
        assert_eq!(offset_testing_quorum_height(QuorumType::Checkpointing, 100), 89);
        assert_eq!(offset_testing_quorum_height(QuorumType::Checkpointing, 5), 0);
        assert_eq!(offset_testing_quorum_height(QuorumType::Obligations, 100), 100);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let (store, head) = filled_store(1_000, 0);
        assert_eq!(head.height, 1_000);
        assert_eq!(store.state_history.len(), 359);
        assert_eq!(store.state_history.keys().next(), Some(&641));
        assert!(store.state_archive.contains_key(&0));
        assert!(store.old_quorum_states.is_empty());
    }

    #[test]
    fn test_archive_keeps_quorum_only_before_interval() {
        let (store, _) = filled_store(STORE_LONG_TERM_STATE_INTERVAL + 400, 0);
        let boundary = store.state_archive.get(&STORE_LONG_TERM_STATE_INTERVAL).unwrap();
        assert!(!boundary.only_stored_quorums);
        let before = store
            .state_archive
            .get(&(STORE_LONG_TERM_STATE_INTERVAL - 10))
            .unwrap();
        assert!(before.only_stored_quorums);
        assert!(before.quorums.get(QuorumType::Obligations).is_some());
        assert!(!store
            .state_archive
            .contains_key(&(STORE_LONG_TERM_STATE_INTERVAL - 100)));
        assert!(store.state_added_to_archive);
    }

    #[test]
    fn test_old_quorums_trimmed_and_searchable() {
        let (store, head) = filled_store(500, 50);
        assert_eq!(store.old_quorum_states.len(), 50);
        let view = HistoryView::new(&head, &store);
        assert!(view.get_quorum(QuorumType::Obligations, 130, false, None).is_none());
        let quorum = view.get_quorum(QuorumType::Obligations, 130, true, None).unwrap();
        assert_eq!(quorum.validators, vec![[130u8; 32]]);
    }

    #[test]
    fn test_view_prefers_head_then_parent() {
        let (store, head) = filled_store(20, 0);
        let next = state_at(21);
        let view = HistoryView::new(&next, &store).with_parent(&head);
        assert_eq!(view.find_state(21).unwrap().height, 21);
        assert_eq!(view.find_state(20).unwrap().height, 20);
        assert_eq!(view.find_state(19).unwrap().height, 19);
        assert!(view.find_state(22).is_none());
    }

    #[test]
    fn test_alt_quorums_collected() {
        let (mut store, head) = filled_store(20, 0);
        let mut alt = state_at(15);
        alt.block_hash = [0xaa; 32];
        store.alt_states.insert(alt.block_hash, alt);

        let view = HistoryView::new(&head, &store).with_alt();
        let mut alt_quorums = Vec::new();
        let main = view.get_quorum(QuorumType::Obligations, 15, false, Some(&mut alt_quorums));
        assert!(main.is_some());
        assert_eq!(alt_quorums.len(), 1);
        assert_eq!(view.alt_states_at(15).count(), 1);
        assert_eq!(HistoryView::new(&head, &store).alt_states_at(15).count(), 0);
    }

    #[test]
    fn test_alt_states_culled() {
        let (mut store, mut head) = filled_store(20, 0);
        let mut alt = state_at(15);
        alt.block_hash = [0xbb; 32];
        store.alt_states.insert(alt.block_hash, alt);
        for height in 21..=400 {
            store.cull_and_push(height, std::mem::replace(&mut head, state_at(height)));
        }
        assert!(store.alt_states.is_empty());
    }

    #[test]
    fn test_rewind_from_history() {
        let (mut store, _) = filled_store(100, 0);
        match store.rewind_to(90) {
            Rewind::Restored(state) => assert_eq!(state.height, 90),
            other => panic!("unexpected rewind {other:?}"),
        }
        assert_eq!(store.state_history.keys().last(), Some(&89));
    }

    #[test]
    fn test_rewind_falls_back_to_archive_or_reinitialise() {
        let (mut store, _) = filled_store(STORE_LONG_TERM_STATE_INTERVAL + 1_000, 0);
        match store.rewind_to(STORE_LONG_TERM_STATE_INTERVAL + 100) {
            Rewind::FromArchive(state) => assert_eq!(state.height, STORE_LONG_TERM_STATE_INTERVAL),
            other => panic!("unexpected rewind {other:?}"),
        }
        assert!(store.state_history.is_empty());

        let mut empty = HistoryStore::default();
        assert!(matches!(empty.rewind_to(50), Rewind::Reinitialise));
    }
}
