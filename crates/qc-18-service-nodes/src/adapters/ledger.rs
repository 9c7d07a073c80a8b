//! Returned-stake sink that just records what it receives.

use crate::ports::outbound::{ReturnedStakes, StakeReturnLedger};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
pub struct InMemoryStakeLedger {
    returned: Mutex<Vec<ReturnedStakes>>,
}

impl InMemoryStakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything returned so far, in arrival order.
    pub fn returned(&self) -> Vec<ReturnedStakes> {
        self.returned.lock().clone()
    }
}

impl StakeReturnLedger for InMemoryStakeLedger {
    fn return_staked_amount(&self, returned: ReturnedStakes) {
        debug!(
            "[qc-18] Returning {} stake(s) for {} at height {} (delay {} blocks)",
            returned.stakes.len(),
            hex::encode(returned.service_node_pubkey),
            returned.height,
            returned.delay_blocks
        );
        self.returned.lock().push(returned);
    }
}
