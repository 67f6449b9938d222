//! # Errors
//!
//! Failure taxonomy shared by the engine and its collaborators.
//! None of these are fatal to a running engine; they decide how much of a cycle is skipped.

use std::time::Duration;

/// Errors raised while resolving, fetching, or persisting.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The source feed cannot be resolved. The whole cycle is aborted.
    #[error("source feed {feed} is unavailable: {reason}")]
    SourceUnavailable { feed: String, reason: String },

    /// A generic fetch or send failure reported by the gateway.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid schedule: {0}")]
    Schedule(String),

    #[error("configuration store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of a single failed send towards one destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Backend-mandated pause before further sends are accepted.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// The destination cannot be resolved or refuses our messages.
    #[error("destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("send failed: {0}")]
    Failed(String),
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
