mod config;
mod engine;
mod high_jump;

pub use config::{validate_scoring, ScoringConfig};
pub use engine::{score, PoolEntry, Rank};
