//! Executor errors

use berth_manifest::DocumentKind;
use berth_store::{JobId, JobStatus, StoreError};
use thiserror::Error;

/// Errors from execution backends
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A document could not be applied; the job has been marked failed
    #[error("failed to apply {kind}/{name}: {message}")]
    ApplyFailed {
        /// Kind of the failing document
        kind: DocumentKind,
        /// Name of the failing document
        name: String,
        /// Cluster error text
        message: String,
    },

    /// No job with this id
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The job already reached a terminal state
    #[error("cannot cancel job in {status} state")]
    TerminalState {
        /// Job id
        id: JobId,
        /// Its terminal state
        status: JobStatus,
    },

    /// Cluster call failed
    #[error("cluster error: {0}")]
    Cluster(#[from] berth_common::Error),

    /// Job store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}
