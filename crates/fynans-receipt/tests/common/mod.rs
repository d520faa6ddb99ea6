//! Shared helpers for fynans-receipt integration tests.
//!
//! - `ReceiptHarness` wires a queue, worker pool and pipeline around
//!   scripted collaborators
//! - builders for configs and seeded finance stores

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
