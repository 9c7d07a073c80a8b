//! # Integration Tests
//!
//! Flows that exercise the registry through its public API, from block
//! application through quorums, history and persistence.

#[cfg(test)]
pub mod harness;

#[cfg(test)]
mod concurrency;
#[cfg(test)]
mod flows;
#[cfg(test)]
mod properties;
