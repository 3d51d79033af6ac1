//! Persistence for manifest versions, projects and jobs
//!
//! Three narrow traits, each implemented by an in-memory store (tests and
//! single-node development) and a PostgreSQL store.

#![deny(missing_docs)]

mod error;
mod memory;
mod postgres;
mod types;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use types::{
    Document, Job, JobId, JobStatus, NewDocument, NewVersion, Page, Project, ProjectId,
    ScheduleWindow, Version, VersionId, VersionSummary,
};

use async_trait::async_trait;

/// Immutable manifest versions and their documents
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Persist a version and all of its documents as one unit.
    ///
    /// Either everything is stored or nothing is; readers never observe a
    /// version with a partial document set.
    async fn create(
        &self,
        version: NewVersion,
        documents: Vec<NewDocument>,
    ) -> StoreResult<Version>;

    /// Get a version by id
    async fn get(&self, id: &VersionId) -> StoreResult<Option<Version>>;

    /// Documents of a version in manifest order
    async fn documents(&self, id: &VersionId) -> StoreResult<Vec<Document>>;

    /// Every version of a project, newest first
    async fn history(&self, project_id: &ProjectId) -> StoreResult<Vec<Version>>;

    /// Version summaries of a project, newest first
    async fn list_by_project(
        &self,
        project_id: &ProjectId,
        page: Page,
    ) -> StoreResult<Vec<VersionSummary>>;

    /// Remove a version together with its documents
    async fn delete(&self, id: &VersionId) -> StoreResult<()>;
}

/// Tenant projects
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Get a project by id
    async fn get(&self, id: &ProjectId) -> StoreResult<Option<Project>>;

    /// All projects
    async fn list(&self) -> StoreResult<Vec<Project>>;

    /// Create or replace a project
    async fn upsert(&self, project: &Project) -> StoreResult<()>;
}

/// Job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job; fails with `Conflict` if the id exists
    async fn create(&self, job: &Job) -> StoreResult<()>;

    /// Get a job by id
    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Move a job to `status`.
    ///
    /// Fails with `TerminalState` if the job already completed, failed or was
    /// cancelled. Sets `started_at` on the first move to running and
    /// `completed_at` on reaching a terminal state.
    async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> StoreResult<Job>;

    /// Number of a user's jobs in a project that are in one of `statuses`
    async fn count_for_user(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        statuses: &[JobStatus],
    ) -> StoreResult<u64>;

    /// A project's jobs that are in one of `statuses`
    async fn list_for_project(
        &self,
        project_id: &ProjectId,
        statuses: &[JobStatus],
    ) -> StoreResult<Vec<Job>>;
}
