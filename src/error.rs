use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Engine error taxonomy.
///
/// Data-integrity errors carry enough context (ids, document paths) to locate
/// the faulty document. Lock loss is always fatal to a run; a corrupted cache
/// entry is never surfaced here because it is treated as a cache miss.
#[derive(Debug, Error)]
pub enum Error {
    #[error("template file used as data: {path}")]
    TemplateUsedAsData { path: PathBuf },

    #[error("athlete not found: {id}")]
    AthleteNotFound { id: String },

    #[error("multiple athletes found for {id}: {matches:?}")]
    AthleteAmbiguous { id: String, matches: Vec<PathBuf> },

    #[error(
        "competitor {competitor} eligible for multiple leagues of type {league_type}: {leagues:?}"
    )]
    MultipleEligibleLeaguesOfSameType {
        competitor: String,
        league_type: String,
        leagues: Vec<String>,
    },

    #[error("unknown scoring method {method:?} for league {league} ({event_type})")]
    UnknownScoringMethod {
        league: String,
        event_type: String,
        method: String,
    },

    #[error("unknown sort_by {sort_by:?} for league {league} ({event_type})")]
    UnknownSortBy {
        league: String,
        event_type: String,
        sort_by: String,
    },

    #[error("league {league} has no scoring entry for event type {event_type:?}")]
    ScoringNotConfigured { league: String, event_type: String },

    #[error("invalid scoring config for league {league} ({event_type}): {message}")]
    ScoringConfig {
        league: String,
        event_type: String,
        message: String,
    },

    #[error("invalid result for competitor {competitor}: {message}")]
    InvalidResult { competitor: String, message: String },

    #[error("unresolved tie between {left} and {right}: countback exhausted")]
    UnresolvedTie { left: String, right: String },

    #[error("store lock lost: {reason}")]
    LockLost { reason: String },

    #[error("rule {expression:?}: {message}")]
    Rule { expression: String, message: String },

    #[error("invalid document {path}: {message}")]
    Data { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn data(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Data {
            path: path.into(),
            message: message.into(),
        }
    }
}
