//! Quorum entities

use serde::{Deserialize, Serialize};
use shared_types::{HardFork, PublicKey};
use std::sync::Arc;

/// Duty a quorum is selected for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum QuorumType {
    /// Tests workers for uptime; votes state changes
    Obligations = 0,
    Checkpointing = 1,
    Blink = 2,
    Pulse = 3,
}

impl QuorumType {
    pub const ALL: [QuorumType; 4] = [
        QuorumType::Obligations,
        QuorumType::Checkpointing,
        QuorumType::Blink,
        QuorumType::Pulse,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Highest quorum type generated at `hf`.
    pub fn max_for_hf(hf: HardFork) -> QuorumType {
        if hf < HardFork::CHECKPOINTING {
            QuorumType::Obligations
        } else if hf < HardFork::BLINK {
            QuorumType::Checkpointing
        } else if hf < HardFork::PULSE {
            QuorumType::Blink
        } else {
            QuorumType::Pulse
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QuorumType::Obligations => "obligation",
            QuorumType::Checkpointing => "checkpointing",
            QuorumType::Blink => "blink",
            QuorumType::Pulse => "pulse",
        }
    }
}

/// Which side of a quorum an index refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuorumGroup {
    Validator,
    Worker,
}

/// An ordered committee. Index position is the slot referenced by votes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum {
    pub validators: Vec<PublicKey>,
    pub workers: Vec<PublicKey>,
}

impl Quorum {
    pub fn group(&self, group: QuorumGroup) -> &[PublicKey] {
        match group {
            QuorumGroup::Validator => &self.validators,
            QuorumGroup::Worker => &self.workers,
        }
    }
}

/// Quorums computed for one height; `None` means "no quorum" at that height.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuorumManager {
    pub obligations: Option<Arc<Quorum>>,
    pub checkpointing: Option<Arc<Quorum>>,
    pub blink: Option<Arc<Quorum>>,
    pub pulse: Option<Arc<Quorum>>,
}

impl QuorumManager {
    pub fn get(&self, quorum_type: QuorumType) -> Option<Arc<Quorum>> {
        self.slot(quorum_type).clone()
    }

    pub fn set(&mut self, quorum_type: QuorumType, quorum: Option<Arc<Quorum>>) {
        *self.slot_mut(quorum_type) = quorum;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn slot(&self, quorum_type: QuorumType) -> &Option<Arc<Quorum>> {
        match quorum_type {
            QuorumType::Obligations => &self.obligations,
            QuorumType::Checkpointing => &self.checkpointing,
            QuorumType::Blink => &self.blink,
            QuorumType::Pulse => &self.pulse,
        }
    }

    fn slot_mut(&mut self, quorum_type: QuorumType) -> &mut Option<Arc<Quorum>> {
        match quorum_type {
            QuorumType::Obligations => &mut self.obligations,
            QuorumType::Checkpointing => &mut self.checkpointing,
            QuorumType::Blink => &mut self.blink,
            QuorumType::Pulse => &mut self.pulse,
        }
    }
}
