// ================================================================
// File: jukebot-common/src/error.rs
// ================================================================

use std::fmt;
use thiserror::Error;

/// Which external collaborator produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Resolver,
    Transport,
    Persistence,
    Recommender,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Collaborator::Resolver => "resolver",
            Collaborator::Transport => "transport",
            Collaborator::Persistence => "persistence",
            Collaborator::Recommender => "recommender",
        };
        f.write_str(s)
    }
}

/// Retryable failures are transient (network, rate limit) and may be retried
/// with backoff. Fatal failures are surfaced immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Fatal,
}

/// Reasons a resolver can reject a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveFailure {
    NotFound,
    RateLimited,
    Unplayable,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Queue is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{collaborator} failure ({kind:?}): {message}")]
    Collaborator {
        collaborator: Collaborator,
        kind: FailureKind,
        message: String,
    },

    #[error("Playback stopped after {attempts} consecutive track failures")]
    BatchFailure { attempts: usize },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    pub fn invalid_state(operation: &'static str, state: impl fmt::Display) -> Self {
        Error::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    pub fn retryable(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Error::Collaborator {
            collaborator,
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Error::Collaborator {
            collaborator,
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    /// Maps a resolver rejection onto the collaborator taxonomy.
    /// Only rate limiting is worth retrying.
    pub fn resolve(failure: ResolveFailure, query: &str) -> Self {
        match failure {
            ResolveFailure::RateLimited => {
                Error::retryable(Collaborator::Resolver, format!("rate limited while resolving '{query}'"))
            }
            ResolveFailure::NotFound => {
                Error::fatal(Collaborator::Resolver, format!("nothing found for '{query}'"))
            }
            ResolveFailure::Unplayable => {
                Error::fatal(Collaborator::Resolver, format!("'{query}' is not playable"))
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Collaborator { kind, .. } => *kind == FailureKind::Retryable,
            Error::Timeout(_) | Error::Io(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}
