use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures talking to the remote issue tracker.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limit exhausted, resets at {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Errors after which no further remote call can succeed in this run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status == 401,
            Self::Decode(_) => false,
        }
    }
}

/// Why one task, link or issue could not be reconciled.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("link {link_id} has no issue number")]
    MissingIssue { link_id: i64 },

    #[error("issue #{number} has a task block that does not parse, refusing to import it")]
    GarbledBody { number: u64 },

    #[error("no open period to place issue #{number} in")]
    NoPeriod { number: u64 },

    #[error("issue #{number}: {detail}")]
    Inconsistent { number: u64, detail: String },
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_fatal(),
            _ => false,
        }
    }
}
