//! Service Node List - the locked registry facade
//!
//! Owns the registry head, its history tiers and the per-node proof records
//! behind one mutex, and the x25519 lookup map behind its own lock so that
//! network lookups never wait on block processing. Lock order is always
//! registry first, then x25519.

use crate::config::{NetworkConfig, ServiceNodeConfig};
use crate::domain::history::{HistoryStore, HistoryView, Rewind};
use crate::domain::info::LockedContribution;
use crate::domain::persistence::{
    build_long_term, build_short_term, decode, encode, restore, DataForSerialization, LoadContext,
    DATA_VERSION,
};
use crate::domain::proofs::{
    active_x25519_pubkeys, check_uptime_proof, expired_proofs, generate_uptime_proof,
    CheckpointParticipation, ProofCheckContext, ProofEndpoints, ProofInfo, ProofRejection,
    PulseParticipation, TimestampParticipation, TimesyncStatus, UptimeProof, X25519Map,
};
use crate::domain::quorum::{Quorum, QuorumGroup, QuorumType};
use crate::domain::registry::{BlockLeader, InfoPtr, KeyImageBlacklistEntry, RegistryState};
use crate::domain::rewards::{validate_miner_tx, MinerTxInfo};
use crate::domain::rules::{PULSE_QUORUM_NUM_VALIDATORS, TARGET_BLOCK_TIME};
use crate::domain::transitions::{BlockOutcome, TransitionContext};
use crate::domain::verifier::{verify_block, VerifyContext};
use crate::error::{BlockVerificationError, PersistenceError, ServiceNodeError, ServiceNodeResult};
use crate::metrics;
use crate::ports::inbound::{ProofAcceptance, ServiceNodeApi};
use crate::ports::outbound::{
    BatchOperation, BlockchainReader, CryptoProvider, KeyPrefix, ServiceNodeDataStore,
    StakeReturnLedger, TimeSource,
};
use parking_lot::{Mutex, RwLock};
use shared_crypto::Ed25519KeyPair;
use shared_types::{
    Block, BlsPublicKey, Checkpoint, HardFork, KeyImage, PublicKey, Transaction, X25519PublicKey,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Peer service whose reachability other nodes report on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerService {
    StorageServer,
    Lokinet,
}

impl PeerService {
    fn name(self) -> &'static str {
        match self {
            PeerService::StorageServer => "storage server",
            PeerService::Lokinet => "lokinet",
        }
    }
}

/// Everything guarded by the registry lock.
struct ListState {
    state: RegistryState,
    history: HistoryStore,
    proofs: HashMap<PublicKey, ProofInfo>,
    /// BLS key of each recently expired node, with the height it is forgotten at
    recently_expired: HashMap<BlsPublicKey, u64>,
    keys: Option<Arc<Ed25519KeyPair>>,
    my_key: Option<PublicKey>,
    /// Blob layout version of the last successful store
    stored_data_version: Option<u8>,
}

/// Service Node List implementation
pub struct ServiceNodeList<B, C, S, L, T>
where
    B: BlockchainReader,
    C: CryptoProvider,
    S: ServiceNodeDataStore,
    L: StakeReturnLedger,
    T: TimeSource,
{
    config: ServiceNodeConfig,
    net: NetworkConfig,
    inner: Arc<Mutex<ListState>>,
    x25519: Arc<RwLock<X25519Map>>,
    blockchain: Arc<B>,
    crypto: Arc<C>,
    data_store: Arc<S>,
    ledger: Arc<L>,
    clock: Arc<T>,
}

impl<B, C, S, L, T> ServiceNodeList<B, C, S, L, T>
where
    B: BlockchainReader,
    C: CryptoProvider,
    S: ServiceNodeDataStore,
    L: StakeReturnLedger,
    T: TimeSource,
{
    /// Create an empty registry positioned just before service nodes
    /// activate. Call `init` to load or rebuild it.
    pub fn new(
        config: ServiceNodeConfig,
        blockchain: Arc<B>,
        crypto: Arc<C>,
        data_store: Arc<S>,
        ledger: Arc<L>,
        clock: Arc<T>,
    ) -> Self {
        let net = config.network_config();
        let inner = ListState {
            state: RegistryState::new(Self::start_height(&config)),
            history: HistoryStore::new(config.store_quorum_history),
            proofs: HashMap::new(),
            recently_expired: HashMap::new(),
            keys: None,
            my_key: config.service_node_key,
            stored_data_version: None,
        };
        Self {
            config,
            net,
            inner: Arc::new(Mutex::new(inner)),
            x25519: Arc::new(RwLock::new(X25519Map::default())),
            blockchain,
            crypto,
            data_store,
            ledger,
            clock,
        }
    }

    fn start_height(config: &ServiceNodeConfig) -> u64 {
        config
            .activation_height(HardFork::SERVICE_NODES)
            .unwrap_or(1)
            .saturating_sub(1)
    }

    /// Hardfork of the chain tip.
    fn chain_hard_fork(&self) -> HardFork {
        self.config
            .hard_fork_at(self.blockchain.current_height().saturating_sub(1))
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    fn init_locked(&self, inner: &mut ListState) -> ServiceNodeResult<()> {
        let current_height = self.blockchain.current_height();
        if self.chain_hard_fork() < HardFork::SERVICE_NODES {
            self.reset_locked(inner, true)?;
            return Ok(());
        }

        let mut loaded = match self.load_locked(inner, current_height) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("[qc-18] Failed to load service node data: {}", e);
                false
            }
        };

        let wanted = inner.history.store_quorum_history.min(10);
        if loaded && (inner.history.old_quorum_states.len() as u64) < wanted {
            warn!(
                "[qc-18] Full history storage requested, but {} old quorum states found",
                inner.history.old_quorum_states.len()
            );
            loaded = false;
        }

        if !loaded || inner.state.height > current_height {
            self.reset_locked(inner, true)?;
        }
        self.rescan(inner, current_height)
    }

    /// Forget everything and position the registry just before service
    /// nodes activate.
    fn reset_locked(&self, inner: &mut ListState, delete_stored_data: bool) -> ServiceNodeResult<()> {
        inner.history = HistoryStore::new(inner.history.store_quorum_history);
        inner.state = RegistryState::new(Self::start_height(&self.config));
        inner.recently_expired.clear();

        if delete_stored_data {
            self.data_store.atomic_batch_write(vec![
                BatchOperation::delete(KeyPrefix::LONG_TERM_DATA),
                BatchOperation::delete(KeyPrefix::SHORT_TERM_DATA),
            ])?;
            inner.stored_data_version = None;
        }
        Ok(())
    }

    /// Replay canonical blocks above the head, up to (not including) `end_height`.
    fn rescan(&self, inner: &mut ListState, end_height: u64) -> ServiceNodeResult<()> {
        let start_height = inner.state.height + 1;
        if start_height >= end_height {
            return Ok(());
        }
        info!(
            "[qc-18] Recalculating service nodes list, scanning blockchain from height {} to {}",
            start_height,
            end_height - 1
        );

        for height in start_height..end_height {
            let block = self
                .blockchain
                .block_by_height(height)
                .ok_or(ServiceNodeError::MissingBlock { height })?;
            if block.major_version < HardFork::SERVICE_NODES {
                continue;
            }
            let txs = self.blockchain.block_transactions(&block);
            self.process_block(inner, &block, &txs, None, false)?;
        }

        info!(
            "[qc-18] Done recalculating service nodes list, height {}",
            inner.state.height
        );
        Ok(())
    }

    // =========================================================================
    // BLOCK PROCESSING
    // =========================================================================

    /// Apply `block` to a copy of the head, verify it if asked, then publish
    /// the copy and retire the old head into history.
    fn process_block(
        &self,
        inner: &mut ListState,
        block: &Block,
        txs: &[Transaction],
        checkpoint: Option<&Checkpoint>,
        verify: bool,
    ) -> ServiceNodeResult<BlockOutcome> {
        let mut next = inner.state.clone();
        let outcome = {
            let ctx = TransitionContext {
                net: &self.net,
                crypto: self.crypto.as_ref(),
                blockchain: self.blockchain.as_ref(),
                history: HistoryView::new(&inner.state, &inner.history),
                my_key: inner.my_key,
            };
            next.update_from_block(&ctx, block, txs)?
        };

        if verify {
            let ctx = VerifyContext {
                net: &self.net,
                crypto: self.crypto.as_ref(),
                blockchain: self.blockchain.as_ref(),
                view: HistoryView::new(&next, &inner.history).with_parent(&inner.state),
            };
            verify_block(&ctx, block, false, checkpoint)?;
        }

        let previous = std::mem::replace(&mut inner.state, next);
        inner.history.cull_and_push(block.height, previous);
        Ok(outcome)
    }

    /// Side effects of a canonical block outside the registry.
    fn apply_outcome(&self, inner: &mut ListState, outcome: BlockOutcome) {
        let height = inner.state.height;
        let mut touched = Vec::new();

        for key in &outcome.registered {
            inner.proofs.entry(*key).or_default().reset();
            touched.push(*key);
        }
        for key in &outcome.decommissioned {
            inner.proofs.entry(*key).or_default().clear_timestamps();
            touched.push(*key);
        }
        for (key, timestamp) in &outcome.recommissioned {
            inner.proofs.entry(*key).or_default().recommissioned(*timestamp);
            touched.push(*key);
        }
        for (_, bls_pubkey) in &outcome.expired {
            inner
                .recently_expired
                .entry(*bls_pubkey)
                .or_insert(height + self.net.eth_exit_buffer);
        }

        metrics::record_state_changes("registered", outcome.registered.len());
        metrics::record_state_changes("decommissioned", outcome.decommissioned.len());
        metrics::record_state_changes("recommissioned", outcome.recommissioned.len());
        metrics::record_state_changes("expired", outcome.expired.len());

        for returned in outcome.returned_stakes {
            self.ledger.return_staked_amount(returned);
        }

        if let Err(e) = self.persist_proofs(inner, &touched) {
            warn!("[qc-18] Failed to store uptime proofs: {}", e);
        }
    }

    /// Record Pulse validator participation for a freshly received block.
    fn record_block_participation(
        &self,
        inner: &mut ListState,
        block: &Block,
    ) -> ServiceNodeResult<()> {
        let newest_block = self.blockchain.current_height() == block.height + 1;
        let in_time = self.clock.now().abs_diff(block.timestamp) <= TARGET_BLOCK_TIME;
        if !newest_block || !in_time {
            return Ok(());
        }

        let quorum = HistoryView::new(&inner.state, &inner.history)
            .get_quorum(QuorumType::Pulse, block.height, false, None)
            .ok_or_else(|| ServiceNodeError::InvariantViolation {
                reason: "Unexpected Pulse error: quorum was not generated".into(),
            })?;
        if quorum.validators.is_empty() {
            return Err(ServiceNodeError::InvariantViolation {
                reason: "Unexpected Pulse error: quorum was empty".into(),
            });
        }

        for index in 0..PULSE_QUORUM_NUM_VALIDATORS {
            let validator = quorum.validators.get(index).ok_or_else(|| {
                ServiceNodeError::InvariantViolation {
                    reason: format!(
                        "Pulse validator index {} out of bounds for quorum of {}",
                        index,
                        quorum.validators.len()
                    ),
                }
            })?;
            let participated = block.pulse.validator_bitset & (1 << index) != 0;
            Self::record_participation(inner, validator, |info| {
                info.pulse_participation.add(PulseParticipation {
                    height: block.height,
                    round: block.pulse.round,
                    participated,
                })
            });
        }
        Ok(())
    }

    fn update_gauges(inner: &ListState) {
        let active = inner
            .state
            .service_nodes_infos
            .values()
            .filter(|info| info.is_active())
            .count();
        let decommissioned = inner
            .state
            .service_nodes_infos
            .values()
            .filter(|info| info.is_decommissioned())
            .count();
        metrics::set_registry_gauges(active, decommissioned, inner.history.state_history.len());
    }

    fn rejection_label(err: &ServiceNodeError) -> &'static str {
        match err {
            ServiceNodeError::Registration(_) => "registration",
            ServiceNodeError::BlockVerification(_) => "block_verification",
            ServiceNodeError::Persistence(_) => "persistence",
            ServiceNodeError::NonSequentialBlock { .. } => "non_sequential",
            ServiceNodeError::MissingBlock { .. } => "missing_block",
            ServiceNodeError::MissingAltParent { .. } => "missing_alt_parent",
            ServiceNodeError::UnknownBlsKey { .. } => "unknown_bls_key",
            ServiceNodeError::InvariantViolation { .. } => "invariant",
        }
    }

    /// Roll forward from a restored archive state to just below `height`.
    fn replay_to(&self, inner: &mut ListState, height: u64) -> ServiceNodeResult<()> {
        let end_height = height.min(self.blockchain.current_height());
        self.rescan(inner, end_height)
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    fn store_locked(&self, inner: &mut ListState) -> Result<(), PersistenceError> {
        let write_long_term =
            inner.history.state_added_to_archive || inner.stored_data_version != Some(DATA_VERSION);

        let mut operations = Vec::with_capacity(2);
        if write_long_term {
            let long_term = encode("long term data", &build_long_term(&inner.history))?;
            operations.push(BatchOperation::put(KeyPrefix::LONG_TERM_DATA, long_term));
        }
        let short_term = encode(
            "short term data",
            &build_short_term(&inner.history, &inner.state),
        )?;
        operations.push(BatchOperation::put(KeyPrefix::SHORT_TERM_DATA, short_term));

        self.data_store.atomic_batch_write(operations)?;
        inner.history.state_added_to_archive = false;
        inner.stored_data_version = Some(DATA_VERSION);
        Ok(())
    }

    fn load_locked(&self, inner: &mut ListState, current_height: u64) -> ServiceNodeResult<bool> {
        info!("[qc-18] Loading service node list");
        self.reset_locked(inner, false)?;

        let long_term = match self.data_store.get(KeyPrefix::LONG_TERM_DATA)? {
            Some(blob) => match decode::<DataForSerialization>("long term data", &blob) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("[qc-18] Ignoring unreadable long term data: {}", e);
                    None
                }
            },
            None => None,
        };

        let Some(blob) = self.data_store.get(KeyPrefix::SHORT_TERM_DATA)? else {
            return Ok(false);
        };
        let short_term = match decode::<DataForSerialization>("short term data", &blob) {
            Ok(data) => data,
            Err(e) => {
                warn!("[qc-18] Short term data could not be read: {}", e);
                return Ok(false);
            }
        };

        let hard_fork_at = |height: u64| self.config.hard_fork_at(height);
        let block_hash_at =
            |height: u64| self.blockchain.block_by_height(height).map(|block| block.hash);
        let ctx = LoadContext {
            hard_fork_at: &hard_fork_at,
            block_hash_at: &block_hash_at,
        };
        let restored = match restore(
            long_term,
            short_term,
            &ctx,
            current_height,
            inner.history.store_quorum_history,
        ) {
            Ok(restored) => restored,
            Err(e) => {
                warn!("[qc-18] Stored service node data rejected: {}", e);
                return Ok(false);
            }
        };
        inner.state = restored.head;
        inner.history = restored.history;

        inner.proofs.clear();
        for (key, value) in self.data_store.prefix_scan(KeyPrefix::PROOF)? {
            let Some(pubkey) = KeyPrefix::pubkey_from_proof_key(&key) else {
                continue;
            };
            match decode::<ProofInfo>("uptime proof", &value) {
                Ok(mut proof) => {
                    // Resend our own proof promptly after a restart.
                    if inner.my_key == Some(pubkey) {
                        proof.clear_timestamps();
                    }
                    inner.proofs.insert(pubkey, proof);
                }
                Err(e) => warn!(
                    "[qc-18] Dropping unreadable proof for {}: {}",
                    hex::encode(pubkey),
                    e
                ),
            }
        }

        self.x25519
            .write()
            .initialize(&inner.state, &inner.proofs, self.clock.now());

        info!(
            "[qc-18] Service node data loaded successfully, height: {}, {} nodes",
            inner.state.height,
            inner.state.service_nodes_infos.len()
        );
        Ok(true)
    }

    fn persist_proofs(&self, inner: &ListState, keys: &[PublicKey]) -> Result<(), PersistenceError> {
        let mut operations = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(proof) = inner.proofs.get(key) {
                operations.push(BatchOperation::put(
                    KeyPrefix::proof_key(key),
                    encode("uptime proof", proof)?,
                ));
            }
        }
        if operations.is_empty() {
            return Ok(());
        }
        self.data_store.atomic_batch_write(operations)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn height(&self) -> u64 {
        self.inner.lock().state.height
    }

    /// Copy of the registry head. Entries stay shared with the live registry.
    pub fn state(&self) -> RegistryState {
        self.inner.lock().state.clone()
    }

    pub fn get_block_leader(&self) -> BlockLeader {
        self.inner.lock().state.get_block_leader()
    }

    pub fn state_history_exists(&self, height: u64) -> bool {
        self.inner.lock().history.state_history_exists(height)
    }

    pub fn get_service_node_count(&self) -> usize {
        self.inner.lock().state.service_nodes_infos.len()
    }

    /// Entries for `pubkeys`, or every entry when `pubkeys` is empty.
    /// Unknown keys are skipped.
    pub fn get_service_node_list_state(&self, pubkeys: &[PublicKey]) -> Vec<(PublicKey, InfoPtr)> {
        let inner = self.inner.lock();
        let infos = &inner.state.service_nodes_infos;
        if pubkeys.is_empty() {
            return infos
                .iter()
                .map(|(key, info)| (*key, Arc::clone(info)))
                .collect();
        }
        pubkeys
            .iter()
            .filter_map(|key| infos.get(key).map(|info| (*key, Arc::clone(info))))
            .collect()
    }

    pub fn get_quorum_pubkey(
        &self,
        quorum_type: QuorumType,
        group: QuorumGroup,
        height: u64,
        index: usize,
    ) -> Option<PublicKey> {
        let Some(quorum) = self.get_quorum(quorum_type, height, false, None) else {
            info!(
                "[qc-18] Quorum for height: {}, was not stored by the daemon",
                height
            );
            return None;
        };
        let members = quorum.group(group);
        let key = members.get(index).copied();
        if key.is_none() {
            error!(
                "[qc-18] Quorum indexing out of bounds: {}, quorum_size: {}",
                index,
                members.len()
            );
        }
        key
    }

    /// Unlock height and contribution of the stake locking `key_image`.
    pub fn is_key_image_locked(&self, key_image: &KeyImage) -> Option<(u64, LockedContribution)> {
        self.inner
            .lock()
            .state
            .find_locked_key_image(key_image)
            .map(|(_, unlock_height, contribution)| (unlock_height, contribution))
    }

    pub fn get_blacklisted_key_images(&self) -> Vec<KeyImageBlacklistEntry> {
        self.inner.lock().state.key_image_blacklist.clone()
    }

    /// Whether `tx` would unlock a small contribution before its timer ran out.
    pub fn is_premature_unlock(&self, hf: HardFork, block_height: u64, tx: &Transaction) -> bool {
        self.inner
            .lock()
            .state
            .is_premature_unlock(&self.net, hf, block_height, tx)
    }

    pub fn bls_public_key_lookup(&self, bls_pubkey: &BlsPublicKey) -> ServiceNodeResult<PublicKey> {
        let found = self.inner.lock().state.find_by_bls_key(bls_pubkey);
        found.ok_or_else(|| {
            warn!(
                "[qc-18] Could not find service node for BLS key {}",
                hex::encode(bls_pubkey)
            );
            ServiceNodeError::UnknownBlsKey {
                bls_pubkey: hex::encode(bls_pubkey),
            }
        })
    }

    pub fn is_recently_expired(&self, bls_pubkey: &BlsPublicKey) -> bool {
        self.inner.lock().recently_expired.contains_key(bls_pubkey)
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// `1` keeps every old quorum, `0` keeps none.
    pub fn set_quorum_history_storage(&self, size: u64) {
        self.inner.lock().history.set_quorum_history_storage(size);
    }

    pub fn set_my_service_node_keys(&self, keys: Option<Arc<Ed25519KeyPair>>) {
        let mut inner = self.inner.lock();
        inner.my_key = keys
            .as_ref()
            .map(|keys| keys.public_key().to_bytes())
            .or(self.config.service_node_key);
        inner.keys = keys;
    }

    // =========================================================================
    // PROOFS AND PARTICIPATION
    // =========================================================================

    fn reject_proof(proof: &UptimeProof, reason: ProofRejection) -> ProofRejection {
        debug!(
            "[qc-18] Rejecting uptime proof from {}: {}",
            hex::encode(proof.pubkey),
            reason
        );
        metrics::record_proof_rejected(reason.label());
        reason
    }

    /// Drop proofs of nodes that left the registry long enough ago.
    pub fn cleanup_proofs(&self) -> ServiceNodeResult<()> {
        debug!("[qc-18] Cleaning up expired SN proofs");
        let mut inner = self.inner.lock();
        let expired = expired_proofs(&inner.proofs, &inner.state, self.clock.now());
        if expired.is_empty() {
            return Ok(());
        }
        self.data_store.atomic_batch_write(
            expired
                .iter()
                .map(|key| BatchOperation::delete(KeyPrefix::proof_key(key)))
                .collect(),
        )?;
        for key in &expired {
            inner.proofs.remove(key);
        }
        Ok(())
    }

    pub fn get_proof_info(&self, pubkey: &PublicKey) -> Option<ProofInfo> {
        self.inner.lock().proofs.get(pubkey).cloned()
    }

    fn record_participation(
        inner: &mut ListState,
        pubkey: &PublicKey,
        record: impl FnOnce(&mut ProofInfo),
    ) {
        if inner.state.service_nodes_infos.contains_key(pubkey) {
            record(inner.proofs.entry(*pubkey).or_default());
        }
    }

    pub fn record_checkpoint_participation(&self, pubkey: &PublicKey, height: u64, participated: bool) {
        Self::record_participation(&mut self.inner.lock(), pubkey, |info| {
            info.checkpoint_participation.add(CheckpointParticipation {
                height,
                participated,
            })
        });
    }

    pub fn record_pulse_participation(
        &self,
        pubkey: &PublicKey,
        height: u64,
        round: u8,
        participated: bool,
    ) {
        Self::record_participation(&mut self.inner.lock(), pubkey, |info| {
            info.pulse_participation.add(PulseParticipation {
                height,
                round,
                participated,
            })
        });
    }

    pub fn record_timestamp_participation(&self, pubkey: &PublicKey, participated: bool) {
        Self::record_participation(&mut self.inner.lock(), pubkey, |info| {
            info.timestamp_participation
                .add(TimestampParticipation { participated })
        });
    }

    pub fn record_timesync_status(&self, pubkey: &PublicKey, in_sync: bool) {
        Self::record_participation(&mut self.inner.lock(), pubkey, |info| {
            info.timesync_status.add(TimesyncStatus { in_sync })
        });
    }

    fn set_peer_reachable(&self, service: PeerService, pubkey: &PublicKey, reachable: bool) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.service_nodes_infos.contains_key(pubkey) {
            debug!(
                "[qc-18] Dropping {} reachable report: {} is not a registered SN pubkey",
                service.name(),
                hex::encode(pubkey)
            );
            return false;
        }
        debug!(
            "[qc-18] Received {}{} report for SN {}",
            service.name(),
            if reachable { " reachable" } else { " UNREACHABLE" },
            hex::encode(pubkey)
        );

        let now = self.clock.now();
        let info = inner.proofs.entry(*pubkey).or_default();
        match service {
            PeerService::StorageServer => info.ss_reachable.record(reachable, now),
            PeerService::Lokinet => info.lokinet_reachable.record(reachable, now),
        }
        true
    }

    /// Record a peer's report on `pubkey`'s storage server. False if the node
    /// is not registered.
    pub fn set_storage_server_peer_reachable(&self, pubkey: &PublicKey, reachable: bool) -> bool {
        self.set_peer_reachable(PeerService::StorageServer, pubkey, reachable)
    }

    pub fn set_lokinet_peer_reachable(&self, pubkey: &PublicKey, reachable: bool) -> bool {
        self.set_peer_reachable(PeerService::Lokinet, pubkey, reachable)
    }

    /// Latest trustworthy report, if any.
    pub fn peer_reachable(&self, service: PeerService, pubkey: &PublicKey) -> Option<bool> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let info = inner.proofs.get(pubkey)?;
        match service {
            PeerService::StorageServer => info.ss_reachable.reachable(now),
            PeerService::Lokinet => info.lokinet_reachable.reachable(now),
        }
    }

    pub fn peer_unreachable_for(&self, service: PeerService, pubkey: &PublicKey, threshold: u64) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner.proofs.get(pubkey).is_some_and(|info| match service {
            PeerService::StorageServer => info.ss_reachable.unreachable_for(threshold, now),
            PeerService::Lokinet => info.lokinet_reachable.unreachable_for(threshold, now),
        })
    }

    // =========================================================================
    // X25519
    // =========================================================================

    pub fn get_pubkey_from_x25519(&self, x25519: &X25519PublicKey) -> Option<PublicKey> {
        self.x25519.read().get(x25519)
    }

    /// Quorumnet address of the node behind `x25519`, as `tcp://ip:port`.
    pub fn remote_lookup(&self, x25519: &X25519PublicKey) -> Option<String> {
        let Some(pubkey) = self.get_pubkey_from_x25519(x25519) else {
            debug!(
                "[qc-18] no connection available: could not find primary pubkey from x25519 pubkey {}",
                hex::encode(x25519)
            );
            return None;
        };

        let inner = self.inner.lock();
        if !inner.state.service_nodes_infos.contains_key(&pubkey) {
            debug!(
                "[qc-18] no connection available: primary pubkey {} is not registered",
                hex::encode(pubkey)
            );
            return None;
        }
        let address = inner
            .proofs
            .get(&pubkey)
            .and_then(|info| info.proof.quorumnet_address());
        if address.is_none() {
            debug!(
                "[qc-18] no connection available: service node {} has no associated ip and/or port",
                hex::encode(pubkey)
            );
        }
        address
    }

    pub fn initialize_x25519_map(&self) {
        let inner = self.inner.lock();
        self.x25519
            .write()
            .initialize(&inner.state, &inner.proofs, self.clock.now());
    }

    /// x25519 keys of every active node that has sent a proof.
    pub fn copy_active_x25519_pubkeys(&self) -> Vec<X25519PublicKey> {
        let inner = self.inner.lock();
        active_x25519_pubkeys(&inner.state, &inner.proofs)
    }
}

impl<B, C, S, L, T> ServiceNodeApi for ServiceNodeList<B, C, S, L, T>
where
    B: BlockchainReader,
    C: CryptoProvider,
    S: ServiceNodeDataStore,
    L: StakeReturnLedger,
    T: TimeSource,
{
    fn init(&self) -> ServiceNodeResult<()> {
        let mut inner = self.inner.lock();
        self.init_locked(&mut inner)?;
        Self::update_gauges(&inner);
        Ok(())
    }

    fn block_add(
        &self,
        block: &Block,
        txs: &[Transaction],
        checkpoint: Option<&Checkpoint>,
    ) -> ServiceNodeResult<()> {
        if block.major_version < HardFork::SERVICE_NODES {
            return Ok(());
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let outcome = match self.process_block(inner, block, txs, checkpoint, true) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "[qc-18] Block {} at height {} rejected: {}",
                    hex::encode(block.hash),
                    block.height,
                    e
                );
                metrics::record_block_rejected(Self::rejection_label(&e));
                return Err(e);
            }
        };
        self.apply_outcome(inner, outcome);

        if block.has_pulse_components() {
            self.record_block_participation(inner, block)?;
        }

        let height = inner.state.height;
        inner
            .recently_expired
            .retain(|_, forget_at| *forget_at >= height);

        metrics::record_block_processed();
        Self::update_gauges(inner);
        Ok(())
    }

    fn alt_block_add(
        &self,
        block: &Block,
        txs: &[Transaction],
        checkpoint: Option<&Checkpoint>,
    ) -> ServiceNodeResult<()> {
        if block.major_version < HardFork::SERVICE_NODES {
            return Ok(());
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.history.alt_states.contains_key(&block.hash) {
            return Ok(());
        }

        let alt_state = {
            let history = &inner.history;
            let starting_state = history
                .state_history
                .get(&block.height.saturating_sub(1))
                .filter(|state| state.block_hash == block.prev_hash)
                .or_else(|| history.alt_states.get(&block.prev_hash))
                .ok_or(ServiceNodeError::MissingAltParent {
                    block_hash: block.hash,
                })?;
            if starting_state.block_hash != block.prev_hash {
                return Err(ServiceNodeError::InvariantViolation {
                    reason: format!(
                        "Unexpected state hash: {}, does not match the block prev hash: {}",
                        hex::encode(starting_state.block_hash),
                        hex::encode(block.prev_hash)
                    ),
                });
            }

            let mut alt_state = starting_state.clone();
            let ctx = TransitionContext {
                net: &self.net,
                crypto: self.crypto.as_ref(),
                blockchain: self.blockchain.as_ref(),
                history: HistoryView::new(starting_state, history).with_alt(),
                my_key: inner.my_key,
            };
            alt_state.update_from_block(&ctx, block, txs)?;

            let ctx = VerifyContext {
                net: &self.net,
                crypto: self.crypto.as_ref(),
                blockchain: self.blockchain.as_ref(),
                view: HistoryView::new(&alt_state, history)
                    .with_parent(starting_state)
                    .with_alt(),
            };
            verify_block(&ctx, block, true, checkpoint)?;
            alt_state
        };

        debug!(
            "[qc-18] Stored alt state for block {} at height {}",
            hex::encode(block.hash),
            block.height
        );
        inner.history.alt_states.insert(block.hash, alt_state);
        Ok(())
    }

    fn blockchain_detached(&self, height: u64) -> ServiceNodeResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let revert_to_height = height.saturating_sub(1);

        match inner.history.rewind_to(revert_to_height) {
            Rewind::Restored(state) => inner.state = state,
            Rewind::FromArchive(state) => {
                info!(
                    "[qc-18] Rewinding to archived state at height {}, replaying to {}",
                    state.height, revert_to_height
                );
                inner.state = state;
                self.replay_to(inner, height)?;
            }
            Rewind::Reinitialise => {
                warn!(
                    "[qc-18] No stored state for height {}, rebuilding the service node list",
                    revert_to_height
                );
                self.init_locked(inner)?;
            }
        }

        Self::update_gauges(inner);
        Ok(())
    }

    fn get_quorum(
        &self,
        quorum_type: QuorumType,
        height: u64,
        include_old: bool,
        alt_quorums: Option<&mut Vec<Arc<Quorum>>>,
    ) -> Option<Arc<Quorum>> {
        let inner = self.inner.lock();
        HistoryView::new(&inner.state, &inner.history).get_quorum(
            quorum_type,
            height,
            include_old,
            alt_quorums,
        )
    }

    fn is_service_node(&self, pubkey: &PublicKey, require_active: bool) -> bool {
        self.inner
            .lock()
            .state
            .is_service_node(pubkey, require_active)
    }

    fn validate_miner_tx(&self, info: &MinerTxInfo<'_>) -> Result<(), BlockVerificationError> {
        let inner = self.inner.lock();
        validate_miner_tx(
            self.crypto.as_ref(),
            &self.net,
            self.blockchain.as_ref(),
            &inner.state,
            info,
        )
    }

    fn handle_uptime_proof(&self, proof: UptimeProof) -> Result<ProofAcceptance, ProofRejection> {
        let now = self.clock.now();
        let ctx = ProofCheckContext {
            crypto: self.crypto.as_ref(),
            net: &self.net,
            hf: self.chain_hard_fork(),
            now,
            allow_local_ips: self.config.debug_allow_local_ips,
        };
        let derived_x25519 = match check_uptime_proof(&ctx, &proof) {
            Ok(key) => key,
            Err(reason) => return Err(Self::reject_proof(&proof, reason)),
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.state.service_nodes_infos.contains_key(&proof.pubkey) {
            return Err(Self::reject_proof(&proof, ProofRejection::NotRegistered));
        }
        let pubkey = proof.pubkey;
        let info = inner.proofs.entry(pubkey).or_default();
        if info.too_frequent(now, &self.net) {
            return Err(Self::reject_proof(&proof, ProofRejection::TooFrequent));
        }

        let mine = inner.my_key == Some(pubkey);
        if mine {
            info!(
                "[qc-18] Received uptime-proof confirmation back from network for Service Node (yours): {}",
                hex::encode(pubkey)
            );
        } else {
            debug!("[qc-18] Accepted uptime proof from {}", hex::encode(pubkey));
            if inner.my_key == Some(proof.pubkey_ed25519) {
                warn!(
                    "[qc-18] Uptime proof from SN {} is not us, but is using our ed/x25519 keys; \
                     this is likely to lead to deregistration of one or both service nodes.",
                    hex::encode(pubkey)
                );
            }
        }

        let old_x25519 = info.pubkey_x25519;
        if info.update(now, proof, derived_x25519) {
            if let Err(e) = self.persist_proofs(inner, &[pubkey]) {
                warn!("[qc-18] Failed to store uptime proof for {}: {}", hex::encode(pubkey), e);
            }
        }
        self.x25519
            .write()
            .record(pubkey, old_x25519, derived_x25519, now);

        metrics::record_proof_accepted();
        Ok(ProofAcceptance {
            my_uptime_proof_confirmation: mine,
            new_x25519: (derived_x25519 != [0; 32] && derived_x25519 != old_x25519)
                .then_some(derived_x25519),
        })
    }

    fn generate_uptime_proof(&self, endpoints: &ProofEndpoints) -> Option<UptimeProof> {
        let keys = self.inner.lock().keys.clone()?;
        Some(generate_uptime_proof(
            &keys,
            self.chain_hard_fork(),
            self.clock.now(),
            endpoints,
        ))
    }

    fn store(&self) -> ServiceNodeResult<()> {
        if self.chain_hard_fork() < HardFork::SERVICE_NODES {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        self.store_locked(&mut inner).map_err(|e| {
            error!("[qc-18] Failed to store service node info: {}", e);
            ServiceNodeError::from(e)
        })
    }

    fn load(&self, current_height: u64) -> ServiceNodeResult<bool> {
        let mut inner = self.inner.lock();
        self.load_locked(&mut inner, current_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        Ed25519CryptoProvider, InMemoryBlockchain, InMemoryDataStore, InMemoryStakeLedger,
        ManualClock,
    };
    use crate::config::{HardForkActivation, NetworkType, COIN};
    use crate::test_utils::{keypair, node_pubkey, operator_address, stake_tx, test_crypto};
    use shared_crypto::fast_hash;
    use shared_types::{Hash, QuorumSignature};
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    const GENESIS_TIME: u64 = 1_700_000_000;
    const FIRST_SN_HEIGHT: u64 = 10;

    type TestList = ServiceNodeList<
        InMemoryBlockchain,
        Ed25519CryptoProvider,
        InMemoryDataStore,
        InMemoryStakeLedger,
        ManualClock,
    >;

    fn config() -> ServiceNodeConfig {
        ServiceNodeConfig::for_network(
            NetworkType::Fakechain,
            vec![
                HardForkActivation::new(HardFork::Hf7, 0),
                HardForkActivation::new(HardFork::Hf19, FIRST_SN_HEIGHT),
            ],
        )
    }

    fn block_hash(height: u64, fork: u8) -> Hash {
        let mut data = height.to_le_bytes().to_vec();
        data.push(fork);
        fast_hash(&data)
    }

    fn make_block(height: u64, prev_hash: Hash, fork: u8, txs: &[Transaction]) -> Block {
        Block {
            height,
            hash: block_hash(height, fork),
            prev_hash,
            major_version: config().hard_fork_at(height),
            timestamp: GENESIS_TIME + height * TARGET_BLOCK_TIME,
            tx_hashes: txs.iter().map(|tx| tx.hash).collect(),
            ..Block::default()
        }
    }

    struct Harness {
        chain: Arc<InMemoryBlockchain>,
        data_store: Arc<InMemoryDataStore>,
        clock: Arc<ManualClock>,
        list: TestList,
    }

    impl Harness {
        /// Chain holding the pre-service-node blocks only.
        fn new() -> Self {
            let chain = Arc::new(InMemoryBlockchain::new());
            let mut prev = [0u8; 32];
            for height in 0..FIRST_SN_HEIGHT {
                let block = make_block(height, prev, 0, &[]);
                prev = block.hash;
                chain.add_block(block, Vec::new());
            }
            let harness = Self::on_chain(chain, Arc::new(InMemoryDataStore::new()));
            harness.list.init().unwrap();
            harness
        }

        fn on_chain(chain: Arc<InMemoryBlockchain>, data_store: Arc<InMemoryDataStore>) -> Self {
            let clock = Arc::new(ManualClock::new(GENESIS_TIME));
            let list = ServiceNodeList::new(
                config(),
                Arc::clone(&chain),
                Arc::new(test_crypto()),
                Arc::clone(&data_store),
                Arc::new(InMemoryStakeLedger::new()),
                Arc::clone(&clock),
            );
            Self {
                chain,
                data_store,
                clock,
                list,
            }
        }

        fn next_block(&self, txs: &[Transaction]) -> Block {
            let height = self.chain.current_height();
            let prev = self.chain.block_by_height(height - 1).unwrap().hash;
            make_block(height, prev, 0, txs)
        }

        fn mine(&self, txs: Vec<Transaction>) -> Block {
            let block = self.next_block(&txs);
            self.chain.add_block(block.clone(), txs.clone());
            self.list.block_add(&block, &txs, None).unwrap();
            block
        }

        fn register(&self, seed: u8) -> Block {
            self.mine(vec![stake_tx(
                &test_crypto(),
                seed,
                HardFork::Hf19,
                vec![(operator_address(seed), 100 * COIN)],
                100 * COIN,
            )])
        }

        fn snapshot(&self) -> RegistryState {
            self.list.inner.lock().state.clone()
        }
    }

    fn endpoints() -> ProofEndpoints {
        ProofEndpoints {
            public_ip: u32::from(Ipv4Addr::new(8, 8, 4, 4)),
            storage_https_port: 22_021,
            storage_omq_port: 22_020,
            qnet_port: 22_025,
            storage_server_version: [2, 6, 0],
            lokinet_version: [0, 9, 11],
        }
    }

    #[test]
    fn test_init_before_service_nodes_positions_registry() {
        let harness = Harness::new();
        assert_eq!(harness.list.height(), FIRST_SN_HEIGHT - 1);
        assert_eq!(harness.list.get_service_node_count(), 0);
    }

    #[test]
    fn test_block_add_registers_node() {
        let harness = Harness::new();
        harness.register(1);

        let key = node_pubkey(1);
        assert_eq!(harness.list.height(), FIRST_SN_HEIGHT);
        assert!(harness.list.is_service_node(&key, true));
        assert_eq!(harness.list.get_service_node_count(), 1);
        assert!(harness.list.state_history_exists(FIRST_SN_HEIGHT - 1));
        // Registration wipes any proof from an earlier registration.
        assert_eq!(harness.list.get_proof_info(&key), Some(ProofInfo::default()));
        assert!(harness
            .data_store
            .get(&KeyPrefix::proof_key(&key))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_rejected_block_leaves_registry_untouched() {
        let harness = Harness::new();
        harness.register(1);
        let before = harness.snapshot();

        let txs = vec![stake_tx(
            &test_crypto(),
            2,
            HardFork::Hf19,
            vec![(operator_address(2), 100 * COIN)],
            100 * COIN,
        )];
        let mut block = harness.next_block(&txs);
        block.signatures.push(QuorumSignature {
            voter_index: 0,
            signature: [1; 64],
        });
        harness.chain.add_block(block.clone(), txs.clone());

        let err = harness.list.block_add(&block, &txs, None).unwrap_err();
        assert!(matches!(err, ServiceNodeError::BlockVerification(_)));
        assert_eq!(harness.snapshot(), before);
        assert!(!harness.list.is_service_node(&node_pubkey(2), false));
    }

    #[test]
    fn test_non_sequential_block_rejected() {
        let harness = Harness::new();
        let block = make_block(FIRST_SN_HEIGHT + 3, [0; 32], 0, &[]);
        let err = harness.list.block_add(&block, &[], None).unwrap_err();
        assert!(matches!(err, ServiceNodeError::NonSequentialBlock { .. }));
        assert_eq!(harness.list.height(), FIRST_SN_HEIGHT - 1);
    }

    #[test]
    fn test_detach_restores_state_from_history() {
        let harness = Harness::new();
        let mut snapshots = BTreeMap::new();
        harness.register(1);
        snapshots.insert(harness.list.height(), harness.snapshot());
        harness.register(2);
        snapshots.insert(harness.list.height(), harness.snapshot());
        for _ in 0..8 {
            harness.mine(Vec::new());
            snapshots.insert(harness.list.height(), harness.snapshot());
        }
        let top = harness.list.height();

        harness.chain.pop_blocks_from(top - 4);
        harness.list.blockchain_detached(top - 4).unwrap();

        assert_eq!(harness.list.height(), top - 5);
        assert_eq!(harness.snapshot(), snapshots[&(top - 5)]);
    }

    #[test]
    fn test_detach_without_history_rebuilds_from_chain() {
        let harness = Harness::new();
        harness.register(1);
        for _ in 0..6 {
            harness.mine(Vec::new());
        }
        let expected = {
            let inner = harness.list.inner.lock();
            inner.history.state_history[&(inner.state.height - 2)].clone()
        };
        harness.list.inner.lock().history.state_history.clear();

        let detach_at = expected.height + 1;
        harness.chain.pop_blocks_from(detach_at);
        harness.list.blockchain_detached(detach_at).unwrap();

        assert_eq!(harness.snapshot(), expected);
    }

    #[test]
    fn test_alt_block_kept_off_the_canonical_registry() {
        let harness = Harness::new();
        harness.register(1);
        harness.mine(Vec::new());
        let parent = harness.mine(Vec::new());
        harness.mine(Vec::new());
        let canonical = harness.snapshot();

        let alt = make_block(parent.height + 1, parent.hash, 1, &[]);
        harness.chain.add_alt_block(alt.clone(), Vec::new());
        harness.list.alt_block_add(&alt, &[], None).unwrap();

        assert_eq!(harness.snapshot(), canonical);
        let inner = harness.list.inner.lock();
        let stored = &inner.history.alt_states[&alt.hash];
        assert_eq!(stored.height, alt.height);
        assert_eq!(stored.block_hash, alt.hash);
    }

    #[test]
    fn test_alt_block_needs_known_parent() {
        let harness = Harness::new();
        harness.register(1);
        let orphan = make_block(harness.list.height(), [9; 32], 2, &[]);
        let err = harness.list.alt_block_add(&orphan, &[], None).unwrap_err();
        assert!(matches!(err, ServiceNodeError::MissingAltParent { .. }));
    }

    #[test]
    fn test_store_then_init_restores_head() {
        let harness = Harness::new();
        harness.register(1);
        harness.register(2);
        harness.mine(Vec::new());
        harness.list.store().unwrap();
        let expected = harness.snapshot();

        let reloaded = Harness::on_chain(Arc::clone(&harness.chain), Arc::clone(&harness.data_store));
        reloaded.list.init().unwrap();
        assert_eq!(reloaded.snapshot(), expected);
    }

    #[test]
    fn test_init_without_stored_data_rescans_chain() {
        let harness = Harness::new();
        harness.register(1);
        harness.mine(Vec::new());
        harness.register(2);
        let expected = harness.snapshot();

        let fresh = Harness::on_chain(
            Arc::clone(&harness.chain),
            Arc::new(InMemoryDataStore::new()),
        );
        fresh.list.init().unwrap();
        assert_eq!(fresh.snapshot(), expected);
        assert!(fresh.list.is_service_node(&node_pubkey(2), true));
    }

    #[test]
    fn test_uptime_proof_accepted_and_indexed() {
        let harness = Harness::new();
        harness.register(1);
        let key = node_pubkey(1);

        let proof = generate_uptime_proof(&keypair(1), HardFork::Hf19, GENESIS_TIME, &endpoints());
        let accepted = harness.list.handle_uptime_proof(proof.clone()).unwrap();
        assert!(!accepted.my_uptime_proof_confirmation);
        let x25519 = accepted.new_x25519.unwrap();

        assert_eq!(harness.list.get_pubkey_from_x25519(&x25519), Some(key));
        assert_eq!(
            harness.list.remote_lookup(&x25519).as_deref(),
            Some("tcp://8.8.4.4:22025")
        );
        assert_eq!(harness.list.copy_active_x25519_pubkeys(), vec![x25519]);
        assert_eq!(
            harness.list.handle_uptime_proof(proof),
            Err(ProofRejection::TooFrequent)
        );
    }

    #[test]
    fn test_uptime_proof_from_unregistered_node_rejected() {
        let harness = Harness::new();
        harness.register(1);
        let proof = generate_uptime_proof(&keypair(2), HardFork::Hf19, GENESIS_TIME, &endpoints());
        assert_eq!(
            harness.list.handle_uptime_proof(proof),
            Err(ProofRejection::NotRegistered)
        );
    }

    #[test]
    fn test_own_proof_is_confirmed() {
        let harness = Harness::new();
        harness.register(1);
        assert!(harness.list.generate_uptime_proof(&endpoints()).is_none());

        harness
            .list
            .set_my_service_node_keys(Some(Arc::new(keypair(1))));
        let proof = harness.list.generate_uptime_proof(&endpoints()).unwrap();
        let accepted = harness.list.handle_uptime_proof(proof).unwrap();
        assert!(accepted.my_uptime_proof_confirmation);
    }

    #[test]
    fn test_cleanup_drops_proofs_of_departed_nodes() {
        let harness = Harness::new();
        harness.register(1);
        let departed = node_pubkey(5);
        {
            let mut inner = harness.list.inner.lock();
            inner.proofs.insert(
                departed,
                ProofInfo {
                    timestamp: GENESIS_TIME,
                    ..ProofInfo::default()
                },
            );
            harness.list.persist_proofs(&inner, &[departed]).unwrap();
        }

        harness.list.cleanup_proofs().unwrap();
        assert!(harness.list.get_proof_info(&departed).is_some());

        harness.clock.advance(6 * 60 * 60 + 1);
        harness.list.cleanup_proofs().unwrap();
        assert!(harness.list.get_proof_info(&departed).is_none());
        assert!(harness
            .data_store
            .get(&KeyPrefix::proof_key(&departed))
            .unwrap()
            .is_none());
        assert!(harness.list.get_proof_info(&node_pubkey(1)).is_some());
    }

    #[test]
    fn test_peer_reachability_reports() {
        let harness = Harness::new();
        harness.register(1);
        let key = node_pubkey(1);

        assert!(!harness.list.set_lokinet_peer_reachable(&node_pubkey(9), true));
        assert!(harness.list.set_storage_server_peer_reachable(&key, false));
        assert_eq!(
            harness.list.peer_reachable(PeerService::StorageServer, &key),
            Some(false)
        );
        assert_eq!(harness.list.peer_reachable(PeerService::Lokinet, &key), Some(true));

        harness.clock.advance(120);
        assert!(harness.list.set_storage_server_peer_reachable(&key, false));
        assert!(harness
            .list
            .peer_unreachable_for(PeerService::StorageServer, &key, 60));
        assert!(!harness
            .list
            .peer_unreachable_for(PeerService::StorageServer, &key, 3_600));
    }

    #[test]
    fn test_participation_only_for_registered_nodes() {
        let harness = Harness::new();
        harness.register(1);
        harness
            .list
            .record_checkpoint_participation(&node_pubkey(1), 12, false);
        harness
            .list
            .record_checkpoint_participation(&node_pubkey(3), 12, true);

        let info = harness.list.get_proof_info(&node_pubkey(1)).unwrap();
        assert_eq!(info.checkpoint_participation.failures(), 1);
        assert!(harness.list.get_proof_info(&node_pubkey(3)).is_none());
    }

    #[test]
    fn test_recently_expired_entries_age_out() {
        let harness = Harness::new();
        harness.register(1);
        let bls = [7u8; 64];
        let forget_at = harness.list.height() + 1;
        harness
            .list
            .inner
            .lock()
            .recently_expired
            .insert(bls, forget_at);

        harness.mine(Vec::new());
        assert!(harness.list.is_recently_expired(&bls));
        harness.mine(Vec::new());
        assert!(!harness.list.is_recently_expired(&bls));
    }

    #[test]
    fn test_key_image_queries() {
        let harness = Harness::new();
        harness.register(1);

        let (unlock_height, contribution) = harness
            .list
            .is_key_image_locked(&[101; 32])
            .unwrap();
        assert_eq!(unlock_height, 0);
        assert_eq!(contribution.amount, 100 * COIN);
        assert!(harness.list.is_key_image_locked(&[102; 32]).is_none());
        assert!(harness.list.get_blacklisted_key_images().is_empty());
    }

    #[test]
    fn test_lookups_for_unknown_entries() {
        let harness = Harness::new();
        harness.register(1);
        assert!(harness
            .list
            .get_quorum_pubkey(QuorumType::Obligations, QuorumGroup::Validator, 5_000, 0)
            .is_none());
        assert!(matches!(
            harness.list.bls_public_key_lookup(&[3; 64]),
            Err(ServiceNodeError::UnknownBlsKey { .. })
        ));
        assert_eq!(
            harness.list.get_service_node_list_state(&[node_pubkey(1), node_pubkey(4)]).len(),
            1
        );
        assert_eq!(harness.list.get_service_node_list_state(&[]).len(), 1);
    }

    #[test]
    fn test_quorum_history_storage_setting() {
        let harness = Harness::new();
        harness.list.set_quorum_history_storage(1);
        assert_eq!(harness.list.inner.lock().history.store_quorum_history, u64::MAX);
        harness.list.set_quorum_history_storage(0);
        assert_eq!(harness.list.inner.lock().history.store_quorum_history, 0);
    }
}
