//! Error types for labtrack-db
//!
//! Every failure is local and synchronous: nothing is retried and no partial
//! result is ever returned alongside an error.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// labtrack-db error types
#[derive(Error, Debug)]
pub enum Error {
    /// No record or plot exists under the requested key
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same identifier is already stored
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A plot with the same (experiment, name) key is already stored
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or unsupported filter, sort, or payload
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The durable flush did not complete; the mutation was not committed
    #[error("Persistence failure: {0}\nThe in-memory change was rolled back.")]
    PersistenceFailure(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap any flush-path error as a [`Error::PersistenceFailure`].
    #[must_use]
    pub fn persistence(err: &Self) -> Self {
        match err {
            Self::PersistenceFailure(msg) => Self::PersistenceFailure(msg.clone()),
            other => Self::PersistenceFailure(other.to_string()),
        }
    }

    pub(crate) fn invalid_options(err: &serde_json::Error) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
