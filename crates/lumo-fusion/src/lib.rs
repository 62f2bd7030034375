//! Adaptive fusion scoring for Lumo search.
//!
//! Converts raw metadata (location, time) and merged per-shard vector
//! distances into comparable similarities in (0, 1] and blends them into a
//! single ranked score per photo. The half-life decay and confidence
//! formulas in [`formulas`] are load-bearing: the ranking behavior is
//! defined by these exact equations.

pub mod formulas;
pub mod scorer;

pub use formulas::*;
pub use scorer::{FusionOutput, FusionScorer, RankedPhoto};
