//! Tallies per-event competitor results into per-league standings.
//!
//! The engine reads a file-based store of YAML documents (athletes, leagues,
//! event results), resolves which leagues accept each competitor, scores each
//! result against its comparison pool under the league's scoring policy, and
//! folds everything into a per-league tally board. Per-event work is memoized
//! on disk and invalidated by coarse namespace hashes over the athlete,
//! league, and engine-logic collections.

pub mod cache;
pub mod eligibility;
pub mod error;
pub mod model;
pub mod output;
pub mod rules;
pub mod scoring;
pub mod store;
pub mod tally;

pub use error::{Error, Result};
