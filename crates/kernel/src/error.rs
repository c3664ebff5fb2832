//! Store error types.

use thiserror::Error;

/// Errors raised by a store adapter's `count` / `find_many` round-trips.
///
/// Input problems (unknown fields, bad operators, unparseable numbers) are
/// never errors; they are dropped and recorded as diagnostics. Only the
/// store calls fail, and those failures reach the caller unchanged.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("row serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported by this adapter: {0}")]
    Unsupported(String),

    #[error("store error: {0}")]
    Backend(String),
}

/// Result type alias using AdapterError.
pub type AdapterResult<T> = Result<T, AdapterError>;
