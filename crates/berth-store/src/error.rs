//! Store errors

use thiserror::Error;

use crate::types::JobStatus;

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record type ("version", "project", "job")
        entity: &'static str,
        /// Requested id
        id: String,
    },

    /// The job already reached a terminal state
    #[error("job {id} is already {status}")]
    TerminalState {
        /// Job id
        id: String,
        /// Its terminal state
        status: JobStatus,
    },

    /// A record with the same id already exists
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal failure (e.g. poisoned lock)
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::Internal("lock poisoned".to_string())
    }
}
