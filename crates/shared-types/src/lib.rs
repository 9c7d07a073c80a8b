//! # Shared Types Crate
//!
//! Chain entities shared by every crate in the workspace: key and hash
//! aliases, the hardfork ladder, blocks, transactions and their typed
//! extra fields, and checkpoints.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: chain data consumed by more than one crate
//!   is defined here and nowhere else.
//! - **Typed Extras**: transaction extensions are a tagged union with total
//!   accessors returning `Option`, never ad hoc byte scraping.

pub mod entities;

pub use entities::*;
