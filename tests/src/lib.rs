//! # Service Node Test Suite
//!
//! Cross-module tests for the service node subsystem.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs      # Chain fixture driving a ServiceNodeList
//!     ├── flows.rs        # Registration, state change, reorg and persistence flows
//!     ├── properties.rs   # Determinism, copy-on-write, stake and rotation properties
//!     └── concurrency.rs  # Readers racing block application
//!
//! tests/benches/
//! └── quorum_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # With subsystem logs
//! RUST_LOG=debug cargo test -p qc-tests -- --nocapture
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

pub mod integration;
