//! PostgreSQL store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::types::{
    Document, Job, JobId, JobStatus, NewDocument, NewVersion, Page, Project, ProjectId,
    ScheduleWindow, Version, VersionId, VersionSummary,
};
use crate::{JobStore, ProjectStore, VersionStore};

const JOB_COLUMNS: &str = "id, version_id, project_id, namespace, user_id, status, \
     submission_mode, queue_name, priority, submitted_at, started_at, completed_at, error_message";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                author TEXT NOT NULL,
                message TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                version_id TEXT NOT NULL REFERENCES versions(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                content JSONB NOT NULL,
                PRIMARY KEY (version_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                group_id TEXT NOT NULL,
                gpu_quota BIGINT NOT NULL DEFAULT 0,
                max_concurrent_jobs_per_user BIGINT NOT NULL DEFAULT 0,
                max_queued_jobs_per_user BIGINT NOT NULL DEFAULT 0,
                max_job_runtime_seconds BIGINT NOT NULL DEFAULT 0,
                schedule_windows JSONB NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                version_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                submission_mode TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                submitted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_versions_project_created
            ON versions (project_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_project_user_status
            ON jobs (project_id, user_id, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("PostgreSQL schema ready");
        Ok(())
    }

    fn row_to_version(row: &PgRow) -> Version {
        Version {
            id: VersionId::new(row.get::<String, _>("id")),
            project_id: ProjectId::new(row.get::<String, _>("project_id")),
            author: row.get("author"),
            message: row.get("message"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_document(row: &PgRow) -> StoreResult<Document> {
        let kind: String = row.get("kind");
        let position: i32 = row.get("position");
        Ok(Document {
            version_id: VersionId::new(row.get::<String, _>("version_id")),
            position: usize::try_from(position)
                .map_err(|_| StoreError::Serialization(format!("negative position {position}")))?,
            kind: kind.parse().map_err(StoreError::Serialization)?,
            name: row.get("name"),
            content: row.get("content"),
        })
    }

    fn row_to_project(row: &PgRow) -> StoreResult<Project> {
        let windows: serde_json::Value = row.get("schedule_windows");
        let schedule_windows: Vec<ScheduleWindow> = serde_json::from_value(windows).map_err(|e| {
            StoreError::Serialization(format!("failed to deserialise schedule windows: {e}"))
        })?;

        Ok(Project {
            id: ProjectId::new(row.get::<String, _>("id")),
            name: row.get("name"),
            group_id: row.get("group_id"),
            gpu_quota: row.get("gpu_quota"),
            max_concurrent_jobs_per_user: row.get("max_concurrent_jobs_per_user"),
            max_queued_jobs_per_user: row.get("max_queued_jobs_per_user"),
            max_job_runtime_seconds: row.get("max_job_runtime_seconds"),
            schedule_windows,
        })
    }

    fn row_to_job(row: &PgRow) -> StoreResult<Job> {
        let status: String = row.get("status");
        let mode: String = row.get("submission_mode");
        Ok(Job {
            id: JobId::new(row.get::<String, _>("id")),
            version_id: VersionId::new(row.get::<String, _>("version_id")),
            project_id: ProjectId::new(row.get::<String, _>("project_id")),
            namespace: row.get("namespace"),
            user_id: row.get("user_id"),
            status: status.parse().map_err(StoreError::Serialization)?,
            submission_mode: mode.parse().map_err(StoreError::Serialization)?,
            queue_name: row.get("queue_name"),
            priority: row.get("priority"),
            submitted_at: row.get("submitted_at"),
            started_at: row.get::<Option<DateTime<Utc>>, _>("started_at"),
            completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
            error_message: row.get("error_message"),
        })
    }
}

fn status_strings(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl VersionStore for PostgresStore {
    async fn create(&self, new: NewVersion, documents: Vec<NewDocument>) -> StoreResult<Version> {
        let id = VersionId::generate();
        // Dropping the transaction without commit rolls it back
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO versions (id, project_id, author, message, content)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, project_id, author, message, content, created_at
            "#,
        )
        .bind(id.as_str())
        .bind(new.project_id.as_str())
        .bind(&new.author)
        .bind(&new.message)
        .bind(&new.content)
        .fetch_one(&mut *tx)
        .await?;
        let version = Self::row_to_version(&row);

        for (position, doc) in documents.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| StoreError::Internal("too many documents".to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO documents (version_id, position, kind, name, content)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id.as_str())
            .bind(position)
            .bind(doc.kind.as_str())
            .bind(&doc.name)
            .bind(&doc.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            version_id = %version.id,
            project_id = %version.project_id,
            documents = documents.len(),
            "Stored version"
        );
        Ok(version)
    }

    async fn get(&self, id: &VersionId) -> StoreResult<Option<Version>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, author, message, content, created_at
            FROM versions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_version))
    }

    async fn documents(&self, id: &VersionId) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT version_id, position, kind, name, content
            FROM documents
            WHERE version_id = $1
            ORDER BY position
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_document).collect()
    }

    async fn history(&self, project_id: &ProjectId) -> StoreResult<Vec<Version>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, author, message, content, created_at
            FROM versions
            WHERE project_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_version).collect())
    }

    async fn list_by_project(
        &self,
        project_id: &ProjectId,
        page: Page,
    ) -> StoreResult<Vec<VersionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT v.id, v.project_id, v.author, v.message, v.created_at,
                   (SELECT COUNT(*) FROM documents d WHERE d.version_id = v.id) AS document_count
            FROM versions v
            WHERE v.project_id = $1
            ORDER BY v.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(project_id.as_str())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let count: i64 = row.get("document_count");
                VersionSummary {
                    id: VersionId::new(row.get::<String, _>("id")),
                    project_id: ProjectId::new(row.get::<String, _>("project_id")),
                    author: row.get("author"),
                    message: row.get("message"),
                    document_count: usize::try_from(count).unwrap_or_default(),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }

    async fn delete(&self, id: &VersionId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM versions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("version", id));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for PostgresStore {
    async fn get(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, group_id, gpu_quota, max_concurrent_jobs_per_user,
                   max_queued_jobs_per_user, max_job_runtime_seconds, schedule_windows
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_project).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, group_id, gpu_quota, max_concurrent_jobs_per_user,
                   max_queued_jobs_per_user, max_job_runtime_seconds, schedule_windows
            FROM projects
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_project).collect()
    }

    async fn upsert(&self, project: &Project) -> StoreResult<()> {
        let windows = serde_json::to_value(&project.schedule_windows).map_err(|e| {
            StoreError::Serialization(format!("failed to serialise schedule windows: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO projects (
                id, name, group_id, gpu_quota, max_concurrent_jobs_per_user,
                max_queued_jobs_per_user, max_job_runtime_seconds, schedule_windows
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                group_id = EXCLUDED.group_id,
                gpu_quota = EXCLUDED.gpu_quota,
                max_concurrent_jobs_per_user = EXCLUDED.max_concurrent_jobs_per_user,
                max_queued_jobs_per_user = EXCLUDED.max_queued_jobs_per_user,
                max_job_runtime_seconds = EXCLUDED.max_job_runtime_seconds,
                schedule_windows = EXCLUDED.schedule_windows
            "#,
        )
        .bind(project.id.as_str())
        .bind(&project.name)
        .bind(&project.group_id)
        .bind(project.gpu_quota)
        .bind(project.max_concurrent_jobs_per_user)
        .bind(project.max_queued_jobs_per_user)
        .bind(project.max_job_runtime_seconds)
        .bind(&windows)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, version_id, project_id, namespace, user_id, status, submission_mode,
                queue_name, priority, submitted_at, started_at, completed_at, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.version_id.as_str())
        .bind(job.project_id.as_str())
        .bind(&job.namespace)
        .bind(&job.user_id)
        .bind(job.status.as_str())
        .bind(job.submission_mode.as_str())
        .bind(&job.queue_name)
        .bind(job.priority)
        .bind(job.submitted_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> StoreResult<Job> {
        // The terminal guard lives in the WHERE clause so concurrent updates
        // cannot move a job out of a terminal state.
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                status = $2::text,
                started_at = CASE
                    WHEN $2::text = 'running' AND started_at IS NULL THEN NOW()
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $2::text IN ('completed', 'failed', 'cancelled') THEN NOW()
                    ELSE completed_at
                END,
                error_message = COALESCE($3, error_message)
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .bind(status.as_str())
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            debug!(job_id = %id, status = %status, "Updated job status");
            return Self::row_to_job(&row);
        }

        match JobStore::get(self, id).await? {
            Some(job) => Err(StoreError::TerminalState {
                id: id.to_string(),
                status: job.status,
            }),
            None => Err(StoreError::not_found("job", id)),
        }
    }

    async fn count_for_user(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        statuses: &[JobStatus],
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM jobs
            WHERE project_id = $1 AND user_id = $2 AND status = ANY($3)
            "#,
        )
        .bind(project_id.as_str())
        .bind(user_id)
        .bind(status_strings(statuses))
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn list_for_project(
        &self,
        project_id: &ProjectId,
        statuses: &[JobStatus],
    ) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE project_id = $1 AND status = ANY($2) \
             ORDER BY submitted_at"
        ))
        .bind(project_id.as_str())
        .bind(status_strings(statuses))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }
}
