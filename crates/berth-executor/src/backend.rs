//! Execution backend contract

use async_trait::async_trait;
use berth_manifest::SubmissionMode;
use berth_patch::PatchedDocument;
use berth_store::{JobId, JobStatus, ProjectId, VersionId};
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;

#[cfg(test)]
use mockall::automock;

/// A fully patched batch ready to run
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Pre-assigned job id, already stamped on every document
    pub job_id: JobId,
    /// Deployed version
    pub version_id: VersionId,
    /// Owning project
    pub project_id: ProjectId,
    /// Tenant namespace
    pub namespace: String,
    /// Submitting user id
    pub user_id: String,
    /// Submitting user name
    pub username: String,
    /// Documents in manifest order
    pub documents: Vec<PatchedDocument>,
    /// Job or workflow submission
    pub mode: SubmissionMode,
    /// Scheduler queue
    pub queue_name: String,
    /// Scheduling priority
    pub priority: i32,
}

/// Outcome of a successful submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    /// Job id
    pub job_id: JobId,
    /// State after submit
    pub status: JobStatus,
}

/// Runs patched batches and tracks their state.
///
/// Implementations persist the job record before creating any cluster
/// object for it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Persist the job and start it
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResult, ExecutorError>;

    /// Stop a non-terminal job and remove its workloads
    async fn cancel(&self, job_id: &JobId) -> Result<(), ExecutorError>;

    /// Current state, refreshed from the cluster where the backend can
    async fn status(&self, job_id: &JobId) -> Result<JobStatus, ExecutorError>;
}

/// Map an Argo workflow phase to a job state
pub fn map_workflow_phase(phase: &str) -> JobStatus {
    match phase.to_ascii_lowercase().as_str() {
        "pending" => JobStatus::Queued,
        "running" => JobStatus::Running,
        "succeeded" => JobStatus::Completed,
        "failed" | "error" => JobStatus::Failed,
        _ => JobStatus::Queued,
    }
}
