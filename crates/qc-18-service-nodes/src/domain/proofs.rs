//! # Uptime Proofs
//!
//! Nodes broadcast a signed proof of liveness every
//! `uptime_proof_frequency` seconds. This module holds:
//!
//! - `UptimeProof`: the signed message and its canonical hash
//! - `check_uptime_proof`: the checks that need no registry access
//! - `ProofInfo`: what we remember per node (last proof, IPs, participation
//!   history and reachability reports)
//! - `X25519Map`: transport key to primary key lookup
//!
//! Registry checks (registered node, rate limit) and locking live in the
//! service, which owns one `ProofInfo` per node.

use super::registry::RegistryState;
use super::rules::{
    enforces_proof_versions, is_public_ip, MIN_UPTIME_PROOF_VERSIONS,
    PROOF_RETENTION_AFTER_DEREGISTRATION, REACHABLE_MAX_FAILURE_VALIDITY,
    X25519_MAP_PRUNING_INTERVAL, X25519_MAP_PRUNING_LAG,
};
use crate::config::NetworkConfig;
use crate::ports::outbound::CryptoProvider;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{fast_hash, Ed25519KeyPair};
use shared_types::{HardFork, Hash, PublicKey, Signature, X25519PublicKey, NULL_PUBKEY};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Software version advertised in proofs generated by this node.
pub const NODE_VERSION: [u16; 3] = [11, 0, 0];

pub const CHECKPOINT_PARTICIPATION_HISTORY: usize = 8;
pub const PULSE_PARTICIPATION_HISTORY: usize = 8;
pub const TIMESTAMP_PARTICIPATION_HISTORY: usize = 16;
pub const TIMESYNC_STATUS_HISTORY: usize = 16;

// =============================================================================
// PROOF MESSAGE
// =============================================================================

/// A signed uptime proof.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeProof {
    pub version: [u16; 3],
    pub storage_server_version: [u16; 3],
    pub lokinet_version: [u16; 3],
    pub timestamp: u64,
    pub pubkey: PublicKey,
    /// Legacy signature by `pubkey`; only checked before HF21
    #[serde_as(as = "Bytes")]
    pub sig: Signature,
    pub pubkey_ed25519: PublicKey,
    #[serde_as(as = "Bytes")]
    pub sig_ed25519: Signature,
    /// IPv4 address, `a.b.c.d` = `0xaabbccdd`
    pub public_ip: u32,
    pub storage_https_port: u16,
    pub storage_omq_port: u16,
    pub qnet_port: u16,
}

impl Default for UptimeProof {
    fn default() -> Self {
        Self {
            version: [0; 3],
            storage_server_version: [0; 3],
            lokinet_version: [0; 3],
            timestamp: 0,
            pubkey: NULL_PUBKEY,
            sig: [0; 64],
            pubkey_ed25519: NULL_PUBKEY,
            sig_ed25519: [0; 64],
            public_ip: 0,
            storage_https_port: 0,
            storage_omq_port: 0,
            qnet_port: 0,
        }
    }
}

impl UptimeProof {
    /// Keccak over every field except the two signatures.
    pub fn hash(&self) -> Hash {
        let mut data = Vec::with_capacity(9 * 2 + 8 + 2 * 32 + 4 + 3 * 2);
        for part in [
            &self.version,
            &self.storage_server_version,
            &self.lokinet_version,
        ] {
            for component in part {
                data.extend_from_slice(&component.to_le_bytes());
            }
        }
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.pubkey);
        data.extend_from_slice(&self.pubkey_ed25519);
        data.extend_from_slice(&self.public_ip.to_le_bytes());
        data.extend_from_slice(&self.storage_https_port.to_le_bytes());
        data.extend_from_slice(&self.storage_omq_port.to_le_bytes());
        data.extend_from_slice(&self.qnet_port.to_le_bytes());
        fast_hash(&data)
    }

    /// Address quorumnet peers connect to, if the proof advertises one.
    pub fn quorumnet_address(&self) -> Option<String> {
        if self.public_ip == 0 || self.qnet_port == 0 {
            return None;
        }
        Some(format!(
            "tcp://{}:{}",
            Ipv4Addr::from(self.public_ip),
            self.qnet_port
        ))
    }
}

/// Network endpoints and peer software versions to advertise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProofEndpoints {
    pub public_ip: u32,
    pub storage_https_port: u16,
    pub storage_omq_port: u16,
    pub qnet_port: u16,
    pub storage_server_version: [u16; 3],
    pub lokinet_version: [u16; 3],
}

/// Build and sign this node's proof. The primary and Ed25519 keys are the
/// same key; the legacy signature is left empty from HF21.
pub fn generate_uptime_proof(
    keys: &Ed25519KeyPair,
    hf: HardFork,
    timestamp: u64,
    endpoints: &ProofEndpoints,
) -> UptimeProof {
    let pubkey = keys.public_key().to_bytes();
    let mut proof = UptimeProof {
        version: NODE_VERSION,
        storage_server_version: endpoints.storage_server_version,
        lokinet_version: endpoints.lokinet_version,
        timestamp,
        pubkey,
        sig: [0; 64],
        pubkey_ed25519: pubkey,
        sig_ed25519: [0; 64],
        public_ip: endpoints.public_ip,
        storage_https_port: endpoints.storage_https_port,
        storage_omq_port: endpoints.storage_omq_port,
        qnet_port: endpoints.qnet_port,
    };
    let hash = proof.hash();
    let signature = *keys.sign(&hash).as_bytes();
    if hf < HardFork::ETH_BLS {
        proof.sig = signature;
    }
    proof.sig_ed25519 = signature;
    proof
}

// =============================================================================
// STATELESS VALIDATION
// =============================================================================

/// Why a proof was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofRejection {
    #[error("timestamp is too far from now")]
    Timestamp,

    #[error("{component} v{required:?}+ is required for HF{hf} proofs")]
    Version {
        component: &'static str,
        required: [u16; 3],
        hf: u8,
    },

    #[error("public_ip is not actually public")]
    PrivateIp,

    #[error("pubkey != pubkey_ed25519 is not allowed since HF21")]
    MismatchedKeys,

    #[error("required ed25519 auxiliary pubkey not included in proof")]
    MissingEd25519Key,

    #[error("invalid ed25519 pubkey included in proof (x25519 derivation failed)")]
    X25519Derivation,

    #[error("signature validation failed")]
    Signature,

    #[error("ed25519 signature validation failed")]
    Ed25519Signature,

    #[error("invalid quorumnet port in uptime proof")]
    QuorumnetPort,

    #[error("no such service node is currently registered")]
    NotRegistered,

    #[error("already received one uptime proof for this node recently")]
    TooFrequent,
}

impl ProofRejection {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProofRejection::Timestamp => "timestamp",
            ProofRejection::Version { .. } => "version",
            ProofRejection::PrivateIp => "private_ip",
            ProofRejection::MismatchedKeys => "mismatched_keys",
            ProofRejection::MissingEd25519Key => "missing_ed25519",
            ProofRejection::X25519Derivation => "x25519",
            ProofRejection::Signature => "signature",
            ProofRejection::Ed25519Signature => "ed25519_signature",
            ProofRejection::QuorumnetPort => "qnet_port",
            ProofRejection::NotRegistered => "not_registered",
            ProofRejection::TooFrequent => "too_frequent",
        }
    }
}

/// Inputs to `check_uptime_proof`.
pub struct ProofCheckContext<'a> {
    pub crypto: &'a dyn CryptoProvider,
    pub net: &'a NetworkConfig,
    /// Hardfork at the current chain height
    pub hf: HardFork,
    pub now: u64,
    pub allow_local_ips: bool,
}

/// Checks that need no registry access. Returns the x25519 key derived from
/// the proof's Ed25519 key.
pub fn check_uptime_proof(
    ctx: &ProofCheckContext<'_>,
    proof: &UptimeProof,
) -> Result<X25519PublicKey, ProofRejection> {
    if proof.timestamp.abs_diff(ctx.now) > ctx.net.uptime_proof_tolerance {
        return Err(ProofRejection::Timestamp);
    }

    if enforces_proof_versions(ctx.net.network) {
        for min in MIN_UPTIME_PROOF_VERSIONS
            .iter()
            .filter(|min| ctx.hf >= min.hardfork)
        {
            let checks = [
                ("oxend", proof.version, min.oxend),
                ("lokinet", proof.lokinet_version, min.lokinet),
                ("storage server", proof.storage_server_version, min.storage_server),
            ];
            for (component, have, required) in checks {
                if have < required {
                    return Err(ProofRejection::Version {
                        component,
                        required,
                        hf: ctx.hf.as_u8(),
                    });
                }
            }
        }
    }

    if !ctx.allow_local_ips && !is_public_ip(proof.public_ip) {
        return Err(ProofRejection::PrivateIp);
    }

    if ctx.hf >= HardFork::ETH_BLS && proof.pubkey != proof.pubkey_ed25519 {
        return Err(ProofRejection::MismatchedKeys);
    }

    if proof.pubkey_ed25519 == [0; 32] {
        return Err(ProofRejection::MissingEd25519Key);
    }

    let x25519 = ctx
        .crypto
        .ed25519_to_x25519(&proof.pubkey_ed25519)
        .filter(|key| *key != [0; 32])
        .ok_or(ProofRejection::X25519Derivation)?;

    let hash = proof.hash();
    if ctx.hf < HardFork::ETH_BLS
        && !ctx.crypto.verify_signature(&hash, &proof.pubkey, &proof.sig)
    {
        return Err(ProofRejection::Signature);
    }
    if !ctx
        .crypto
        .verify_signature(&hash, &proof.pubkey_ed25519, &proof.sig_ed25519)
    {
        return Err(ProofRejection::Ed25519Signature);
    }

    if proof.qnet_port == 0 {
        return Err(ProofRejection::QuorumnetPort);
    }

    Ok(x25519)
}

// =============================================================================
// PARTICIPATION
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointParticipation {
    pub height: u64,
    pub participated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseParticipation {
    pub height: u64,
    pub round: u8,
    pub participated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampParticipation {
    pub participated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimesyncStatus {
    pub in_sync: bool,
}

/// Entries that record success or failure.
pub trait ParticipationEntry {
    fn pass(&self) -> bool;
}

impl ParticipationEntry for CheckpointParticipation {
    fn pass(&self) -> bool {
        self.participated
    }
}

impl ParticipationEntry for PulseParticipation {
    fn pass(&self) -> bool {
        self.participated
    }
}

impl ParticipationEntry for TimestampParticipation {
    fn pass(&self) -> bool {
        self.participated
    }
}

impl ParticipationEntry for TimesyncStatus {
    fn pass(&self) -> bool {
        self.in_sync
    }
}

/// Last `N` entries; the oldest is evicted on overflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipationHistory<T, const N: usize> {
    entries: VecDeque<T>,
}

impl<T, const N: usize> Default for ParticipationHistory<T, N> {
    fn default() -> Self {
        Self {
            entries: VecDeque::with_capacity(N),
        }
    }
}

impl<T: ParticipationEntry, const N: usize> ParticipationHistory<T, N> {
    pub fn add(&mut self, entry: T) {
        if self.entries.len() == N {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.pass()).count()
    }
}

// =============================================================================
// REACHABILITY
// =============================================================================

/// Peer reports on whether a node's storage server or lokinet answered.
/// Times are seconds from the service's clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReachableStats {
    pub last_reachable: Option<u64>,
    /// Start of the current unreachable streak
    pub first_unreachable: Option<u64>,
    pub last_unreachable: Option<u64>,
}

impl ReachableStats {
    pub fn record(&mut self, reachable: bool, now: u64) {
        if reachable {
            self.last_reachable = Some(now);
            self.first_unreachable = None;
        } else {
            self.last_unreachable = Some(now);
            self.first_unreachable.get_or_insert(now);
        }
    }

    /// `Some(true)` if the latest report was good, `Some(false)` if it was a
    /// recent failure, `None` if the failure is too old to trust.
    pub fn reachable(&self, now: u64) -> Option<bool> {
        if self.last_reachable >= self.last_unreachable {
            return Some(true);
        }
        match self.last_unreachable {
            Some(at) if at + REACHABLE_MAX_FAILURE_VALIDITY > now => Some(false),
            _ => None,
        }
    }

    /// Confirmed unreachable, continuously, for at least `threshold` seconds.
    pub fn unreachable_for(&self, threshold: u64, now: u64) -> bool {
        if self.reachable(now) != Some(false) {
            return false;
        }
        !matches!(self.first_unreachable, Some(first) if first + threshold > now)
    }
}

// =============================================================================
// PER-NODE RECORD
// =============================================================================

/// Everything known about one node's proofs. Only the proof, timestamps,
/// IPs and x25519 key are persisted; participation and reachability are
/// rebuilt at runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofInfo {
    pub proof: UptimeProof,
    /// Arrival time of the last accepted proof
    pub timestamp: u64,
    /// `timestamp`, or the recommission time if that is later
    pub effective_timestamp: u64,
    /// Two most recent public IPs with the time each was last seen
    pub public_ips: [(u32, u64); 2],
    pub pubkey_x25519: X25519PublicKey,

    #[serde(skip)]
    pub checkpoint_participation:
        ParticipationHistory<CheckpointParticipation, CHECKPOINT_PARTICIPATION_HISTORY>,
    #[serde(skip)]
    pub pulse_participation: ParticipationHistory<PulseParticipation, PULSE_PARTICIPATION_HISTORY>,
    #[serde(skip)]
    pub timestamp_participation:
        ParticipationHistory<TimestampParticipation, TIMESTAMP_PARTICIPATION_HISTORY>,
    #[serde(skip)]
    pub timesync_status: ParticipationHistory<TimesyncStatus, TIMESYNC_STATUS_HISTORY>,
    #[serde(skip)]
    pub ss_reachable: ReachableStats,
    #[serde(skip)]
    pub lokinet_reachable: ReachableStats,
}

impl ProofInfo {
    /// Take a newly accepted proof. Returns true when the persisted part
    /// changed.
    pub fn update(&mut self, now: u64, proof: UptimeProof, x25519: X25519PublicKey) -> bool {
        let mut changed = false;
        if self.proof != proof {
            self.proof = proof;
            changed = true;
        }
        if self.timestamp != now {
            self.timestamp = now;
            changed = true;
        }
        self.effective_timestamp = self.timestamp;
        self.pubkey_x25519 = x25519;

        // Only the two most recent IPs matter: enough to see that it changed.
        let ip = self.proof.public_ip;
        if self.public_ips[0].0 != 0 && self.public_ips[0].0 == ip {
            self.public_ips[0].1 = now;
        } else if self.public_ips[1].0 != 0 && self.public_ips[1].0 == ip {
            self.public_ips[1].1 = now;
        } else if self.public_ips[0].1 > self.public_ips[1].1 {
            self.public_ips[1] = (ip, now);
        } else {
            self.public_ips[0] = (ip, now);
        }

        changed
    }

    /// A new registration starts with a clean slate.
    pub fn reset(&mut self) {
        *self = ProofInfo::default();
    }

    /// Decommissioned nodes must send a fresh proof before being tested again.
    pub fn clear_timestamps(&mut self) {
        self.timestamp = 0;
        self.effective_timestamp = 0;
    }

    pub fn recommissioned(&mut self, block_timestamp: u64) {
        self.effective_timestamp = block_timestamp;
        self.checkpoint_participation.reset();
        self.pulse_participation.reset();
        self.timestamp_participation.reset();
        self.timesync_status.reset();
    }

    /// Whether a proof arriving at `now` comes too soon after the last one.
    pub fn too_frequent(&self, now: u64, net: &NetworkConfig) -> bool {
        now <= self.timestamp + net.uptime_proof_frequency / 2
    }
}

/// Proofs of nodes no longer registered that are old enough to drop.
pub fn expired_proofs(
    proofs: &HashMap<PublicKey, ProofInfo>,
    state: &RegistryState,
    now: u64,
) -> Vec<PublicKey> {
    proofs
        .iter()
        .filter(|(pubkey, info)| {
            !state.service_nodes_infos.contains_key(*pubkey)
                && info.timestamp + PROOF_RETENTION_AFTER_DEREGISTRATION < now
        })
        .map(|(pubkey, _)| *pubkey)
        .collect()
}

// =============================================================================
// X25519 MAP
// =============================================================================

/// x25519 transport key to primary key, with the time each entry was last
/// refreshed.
#[derive(Clone, Debug, Default)]
pub struct X25519Map {
    entries: HashMap<X25519PublicKey, (PublicKey, u64)>,
    last_pruned: u64,
}

impl X25519Map {
    pub fn get(&self, x25519: &X25519PublicKey) -> Option<PublicKey> {
        self.entries.get(x25519).map(|(pubkey, _)| *pubkey)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Seed the map from stored proofs of registered nodes. Existing entries
    /// are kept.
    pub fn initialize(
        &mut self,
        state: &RegistryState,
        proofs: &HashMap<PublicKey, ProofInfo>,
        now: u64,
    ) {
        for pubkey in state.service_nodes_infos.keys() {
            let Some(info) = proofs.get(pubkey) else {
                continue;
            };
            if info.pubkey_x25519 != [0; 32] {
                self.entries
                    .entry(info.pubkey_x25519)
                    .or_insert((*pubkey, now));
            }
        }
    }

    /// Record `pubkey` under `new_key`, replacing `old_key` if it changed.
    /// Prunes stale entries at most once per pruning interval.
    pub fn record(
        &mut self,
        pubkey: PublicKey,
        old_key: X25519PublicKey,
        new_key: X25519PublicKey,
        now: u64,
    ) {
        if now.saturating_sub(self.last_pruned) >= X25519_MAP_PRUNING_INTERVAL {
            let cutoff = now.saturating_sub(X25519_MAP_PRUNING_LAG);
            self.entries.retain(|_, (_, seen)| *seen >= cutoff);
            self.last_pruned = now;
        }

        if old_key != [0; 32] && old_key != new_key {
            self.entries.remove(&old_key);
        }
        if new_key != [0; 32] {
            self.entries.insert(new_key, (pubkey, now));
        }
    }
}

/// x25519 keys of active nodes with a known transport key, ordered.
pub fn active_x25519_pubkeys(
    state: &RegistryState,
    proofs: &HashMap<PublicKey, ProofInfo>,
) -> Vec<X25519PublicKey> {
    let keys: BTreeMap<X25519PublicKey, ()> = state
        .service_nodes_infos
        .iter()
        .filter(|(_, info)| info.is_active())
        .filter_map(|(pubkey, _)| proofs.get(pubkey))
        .map(|info| info.pubkey_x25519)
        .filter(|key| *key != [0; 32])
        .map(|key| (key, ()))
        .collect();
    keys.into_keys().collect()
}
