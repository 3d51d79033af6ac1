//! Deploy errors and their classification

use berth_executor::ExecutorError;
use berth_manifest::ManifestError;
use berth_patch::PatchError;
use berth_store::StoreError;
use thiserror::Error;

use crate::schedule::ScheduleError;

/// Result alias for deploy operations
pub type DeployResult<T> = Result<T, DeployError>;

/// How a failure should be reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request or its manifest is invalid; nothing was changed
    Validation,
    /// Refused by quota or schedule; nothing was changed
    Rejected,
    /// The addressed record does not exist
    NotFound,
    /// The actor may not perform the operation
    Forbidden,
    /// The record is in a state that forbids the operation
    Conflict,
    /// The cluster refused or failed a call
    Cluster,
    /// Storage or internal failure
    Internal,
}

/// Errors from deploy orchestration
#[derive(Debug, Error)]
pub enum DeployError {
    /// Manifest failed to parse or validate
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A patch step refused a document
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Malformed request
    #[error("{0}")]
    Invalid(String),

    /// Per-user job cap reached
    #[error("{0}")]
    QuotaExceeded(String),

    /// The project's schedule does not allow jobs now
    #[error("project {project_id} is outside its allowed schedule")]
    OutsideSchedule {
        /// Project id
        project_id: String,
    },

    /// The project's schedule cannot be evaluated
    #[error("invalid schedule for project {project_id}: {source}")]
    Schedule {
        /// Project id
        project_id: String,
        /// Parse failure
        source: ScheduleError,
    },

    /// Record missing
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record type
        entity: &'static str,
        /// Requested id
        id: String,
    },

    /// Actor lacks membership or permission
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Backend failure
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Cluster call failure outside the backend
    #[error(transparent)]
    Cluster(#[from] berth_common::Error),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeployError {
    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify for status mapping and metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Manifest(_) | Self::Patch(_) | Self::Invalid(_) => ErrorCategory::Validation,
            Self::QuotaExceeded(_) | Self::OutsideSchedule { .. } => ErrorCategory::Rejected,
            Self::Schedule { .. } => ErrorCategory::Internal,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Forbidden(_) => ErrorCategory::Forbidden,
            Self::Executor(e) => match e {
                ExecutorError::ApplyFailed { .. } | ExecutorError::Cluster(_) => {
                    ErrorCategory::Cluster
                }
                ExecutorError::JobNotFound(_) => ErrorCategory::NotFound,
                ExecutorError::TerminalState { .. } => ErrorCategory::Conflict,
                ExecutorError::Store(e) => store_category(e),
            },
            Self::Cluster(e) => match e {
                berth_common::Error::Validation { .. } => ErrorCategory::Validation,
                berth_common::Error::Kube { .. } => ErrorCategory::Cluster,
                _ => ErrorCategory::Internal,
            },
            Self::Store(e) => store_category(e),
        }
    }
}

fn store_category(err: &StoreError) -> ErrorCategory {
    match err {
        StoreError::NotFound { .. } => ErrorCategory::NotFound,
        StoreError::TerminalState { .. } | StoreError::Conflict(_) => ErrorCategory::Conflict,
        _ => ErrorCategory::Internal,
    }
}
