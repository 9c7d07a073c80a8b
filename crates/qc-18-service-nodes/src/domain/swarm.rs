//! Swarm assignment
//!
//! Active nodes are grouped into swarms for storage duty. Rebalancing moves as
//! few nodes as possible: unassigned nodes fill the smallest swarms, surplus
//! beyond the ideal size seeds new swarms, and undersized swarms either borrow
//! from the largest ones or are dissolved.

use super::rng::{shuffle_portable, uniform_distribution_portable, Mt19937_64};
use super::rules::UNASSIGNED_SWARM_ID;
use shared_types::PublicKey;
use std::cmp::Reverse;
use std::collections::BTreeMap;

pub const MIN_SWARM_SIZE: usize = 5;
pub const IDEAL_SWARM_SIZE: usize = 7;
pub const NEW_SWARM_SIZE: usize = IDEAL_SWARM_SIZE;

/// Swarm id to member keys.
pub type SwarmMap = BTreeMap<u64, Vec<PublicKey>>;

/// Rebalance `swarms` in place. Unassigned nodes sit under [`UNASSIGNED_SWARM_ID`].
pub fn calc_swarm_changes(swarms: &mut SwarmMap, seed: u64) {
    let mut rng = Mt19937_64::new(seed);

    let mut unassigned = swarms.remove(&UNASSIGNED_SWARM_ID).unwrap_or_default();
    unassigned.sort_unstable();
    shuffle_portable(&mut unassigned, &mut rng);

    if swarms.is_empty() && !unassigned.is_empty() {
        swarms.insert(0, Vec::new());
    }
    for node in unassigned {
        push_to_smallest(swarms, node);
    }

    create_swarms_from_excess(swarms, &mut rng);
    fix_undersized_swarms(swarms, &mut rng);
}

fn smallest_swarm(swarms: &SwarmMap) -> Option<u64> {
    swarms
        .iter()
        .min_by_key(|(id, members)| (members.len(), **id))
        .map(|(id, _)| *id)
}

fn push_to_smallest(swarms: &mut SwarmMap, node: PublicKey) {
    if let Some(members) = smallest_swarm(swarms).and_then(|id| swarms.get_mut(&id)) {
        members.push(node);
    }
}

fn take_random(members: &mut Vec<PublicKey>, rng: &mut Mt19937_64) -> Option<PublicKey> {
    if members.is_empty() {
        return None;
    }
    let index = uniform_distribution_portable(rng, members.len() as u64) as usize;
    Some(members.remove(index))
}

/// Id in the middle of the widest gap between existing swarm ids.
fn new_swarm_id(swarms: &SwarmMap) -> u64 {
    let mut ids: Vec<u64> = swarms.keys().copied().collect();
    if ids.is_empty() {
        return 0;
    }
    ids.insert(0, 0);
    ids.push(UNASSIGNED_SWARM_ID);

    let (low, high) = ids
        .windows(2)
        .map(|pair| (pair[0], pair[1]))
        .max_by_key(|(low, high)| (high - low, Reverse(*low)))
        .unwrap_or((0, UNASSIGNED_SWARM_ID));
    low + (high - low) / 2
}

fn create_swarms_from_excess(swarms: &mut SwarmMap, rng: &mut Mt19937_64) {
    loop {
        let excess: usize = swarms
            .values()
            .map(|members| members.len().saturating_sub(IDEAL_SWARM_SIZE))
            .sum();
        if excess < NEW_SWARM_SIZE {
            return;
        }

        let id = new_swarm_id(swarms);
        if swarms.contains_key(&id) {
            return;
        }
        let mut members = Vec::with_capacity(NEW_SWARM_SIZE);
        while members.len() < NEW_SWARM_SIZE {
            let Some(donor) = swarms
                .iter()
                .max_by_key(|(id, members)| (members.len(), Reverse(**id)))
                .map(|(id, _)| *id)
            else {
                break;
            };
            match swarms.get_mut(&donor).and_then(|m| take_random(m, rng)) {
                Some(node) => members.push(node),
                None => break,
            }
        }
        swarms.insert(id, members);
    }
}

fn fix_undersized_swarms(swarms: &mut SwarmMap, rng: &mut Mt19937_64) {
    loop {
        if swarms.len() <= 1 {
            return;
        }
        let Some(target) = swarms
            .iter()
            .filter(|(_, members)| members.len() < MIN_SWARM_SIZE)
            .min_by_key(|(id, members)| (members.len(), **id))
            .map(|(id, _)| *id)
        else {
            return;
        };

        while swarms.get(&target).map_or(0, Vec::len) < MIN_SWARM_SIZE {
            let donor = swarms
                .iter()
                .filter(|(id, members)| **id != target && members.len() > MIN_SWARM_SIZE)
                .max_by_key(|(id, members)| (members.len(), Reverse(**id)))
                .map(|(id, _)| *id);
            let Some(node) = donor
                .and_then(|donor| swarms.get_mut(&donor))
                .and_then(|members| take_random(members, rng))
            else {
                break;
            };
            if let Some(members) = swarms.get_mut(&target) {
                members.push(node);
            }
        }

        if swarms.get(&target).map_or(0, Vec::len) < MIN_SWARM_SIZE {
            let orphans = swarms.remove(&target).unwrap_or_default();
            for node in orphans {
                push_to_smallest(swarms, node);
            }
        }
    }
}
