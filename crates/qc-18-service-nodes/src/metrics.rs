//! # Service Node Metrics
//!
//! Prometheus metrics for the service node registry.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-18-service-nodes = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `service_nodes_blocks_processed_total` - Counter of canonical blocks applied
//! - `service_nodes_blocks_rejected_total` - Counter of rejected blocks (by reason)
//! - `service_nodes_state_changes_total` - Counter of registry changes (by kind)
//! - `service_nodes_proofs_accepted_total` - Counter of accepted uptime proofs
//! - `service_nodes_proofs_rejected_total` - Counter of rejected uptime proofs (by reason)
//! - `service_nodes_active` - Gauge of active nodes
//! - `service_nodes_decommissioned` - Gauge of decommissioned nodes
//! - `service_nodes_history_depth` - Gauge of states held in short-term history

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, Gauge, IntCounter,
    IntCounterVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Canonical blocks applied
    pub static ref BLOCKS_PROCESSED: IntCounter = register_int_counter!(
        "service_nodes_blocks_processed_total",
        "Total number of canonical blocks applied to the registry"
    )
    .expect("Failed to create BLOCKS_PROCESSED metric");

    /// Blocks rejected, labeled by reason
    pub static ref BLOCKS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "service_nodes_blocks_rejected_total",
        "Total number of blocks rejected by the registry",
        &["reason"]
    )
    .expect("Failed to create BLOCKS_REJECTED metric");

    /// Registry changes, labeled by kind
    pub static ref STATE_CHANGES: IntCounterVec = register_int_counter_vec!(
        "service_nodes_state_changes_total",
        "Total number of service node registry changes",
        &["kind"]
    )
    .expect("Failed to create STATE_CHANGES metric");

    /// Uptime proofs accepted
    pub static ref PROOFS_ACCEPTED: IntCounter = register_int_counter!(
        "service_nodes_proofs_accepted_total",
        "Total number of uptime proofs accepted"
    )
    .expect("Failed to create PROOFS_ACCEPTED metric");

    /// Uptime proofs rejected, labeled by reason
    pub static ref PROOFS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "service_nodes_proofs_rejected_total",
        "Total number of uptime proofs rejected",
        &["reason"]
    )
    .expect("Failed to create PROOFS_REJECTED metric");

    /// Active nodes at the registry head
    pub static ref ACTIVE_NODES: Gauge = register_gauge!(
        "service_nodes_active",
        "Number of active service nodes"
    )
    .expect("Failed to create ACTIVE_NODES metric");

    /// Decommissioned nodes at the registry head
    pub static ref DECOMMISSIONED_NODES: Gauge = register_gauge!(
        "service_nodes_decommissioned",
        "Number of decommissioned service nodes"
    )
    .expect("Failed to create DECOMMISSIONED_NODES metric");

    /// States held in short-term history
    pub static ref HISTORY_DEPTH: Gauge = register_gauge!(
        "service_nodes_history_depth",
        "Number of registry states held in short-term history"
    )
    .expect("Failed to create HISTORY_DEPTH metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

#[cfg(feature = "metrics")]
pub fn record_block_processed() {
    BLOCKS_PROCESSED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_block_rejected(reason: &str) {
    BLOCKS_REJECTED.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_state_changes(kind: &str, count: usize) {
    if count > 0 {
        STATE_CHANGES.with_label_values(&[kind]).inc_by(count as u64);
    }
}

#[cfg(feature = "metrics")]
pub fn record_proof_accepted() {
    PROOFS_ACCEPTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_proof_rejected(reason: &str) {
    PROOFS_REJECTED.with_label_values(&[reason]).inc();
}

/// Update the registry gauges
#[cfg(feature = "metrics")]
pub fn set_registry_gauges(active: usize, decommissioned: usize, history_depth: usize) {
    ACTIVE_NODES.set(active as f64);
    DECOMMISSIONED_NODES.set(decommissioned as f64);
    HISTORY_DEPTH.set(history_depth as f64);
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_block_processed() {}

#[cfg(not(feature = "metrics"))]
pub fn record_block_rejected(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_state_changes(_kind: &str, _count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_proof_accepted() {}

#[cfg(not(feature = "metrics"))]
pub fn record_proof_rejected(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn set_registry_gauges(_active: usize, _decommissioned: usize, _history_depth: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_callable_in_any_build() {
        record_block_processed();
        record_block_rejected("block_verification");
        record_state_changes("registered", 2);
        record_state_changes("expired", 0);
        record_proof_accepted();
        record_proof_rejected("timestamp");
        set_registry_gauges(10, 1, 360);
    }
}
