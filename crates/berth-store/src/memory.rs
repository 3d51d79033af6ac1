//! In-memory store for tests and single-node development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{StoreError, StoreResult};
use crate::types::{
    Document, Job, JobId, JobStatus, NewDocument, NewVersion, Page, Project, ProjectId, Version,
    VersionId, VersionSummary,
};
use crate::{JobStore, ProjectStore, VersionStore};

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order doubles as creation order
    versions: Vec<Version>,
    documents: HashMap<VersionId, Vec<Document>>,
    projects: HashMap<ProjectId, Project>,
    jobs: HashMap<JobId, Job>,
}

/// In-memory store.
///
/// All maps sit behind one lock, so a version and its documents are published
/// in the same critical section. Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::poisoned())
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::poisoned())
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn create(&self, new: NewVersion, documents: Vec<NewDocument>) -> StoreResult<Version> {
        let version = Version {
            id: VersionId::generate(),
            project_id: new.project_id,
            author: new.author,
            message: new.message,
            content: new.content,
            created_at: Utc::now(),
        };
        let documents: Vec<Document> = documents
            .into_iter()
            .enumerate()
            .map(|(position, doc)| Document {
                version_id: version.id.clone(),
                position,
                kind: doc.kind,
                name: doc.name,
                content: doc.content,
            })
            .collect();

        let mut inner = self.write()?;
        inner.documents.insert(version.id.clone(), documents);
        inner.versions.push(version.clone());
        Ok(version)
    }

    async fn get(&self, id: &VersionId) -> StoreResult<Option<Version>> {
        Ok(self.read()?.versions.iter().find(|v| &v.id == id).cloned())
    }

    async fn documents(&self, id: &VersionId) -> StoreResult<Vec<Document>> {
        Ok(self.read()?.documents.get(id).cloned().unwrap_or_default())
    }

    async fn history(&self, project_id: &ProjectId) -> StoreResult<Vec<Version>> {
        Ok(self
            .read()?
            .versions
            .iter()
            .rev()
            .filter(|v| &v.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_by_project(
        &self,
        project_id: &ProjectId,
        page: Page,
    ) -> StoreResult<Vec<VersionSummary>> {
        let inner = self.read()?;
        Ok(inner
            .versions
            .iter()
            .rev()
            .filter(|v| &v.project_id == project_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|v| VersionSummary {
                id: v.id.clone(),
                project_id: v.project_id.clone(),
                author: v.author.clone(),
                message: v.message.clone(),
                document_count: inner.documents.get(&v.id).map_or(0, Vec::len),
                created_at: v.created_at,
            })
            .collect())
    }

    async fn delete(&self, id: &VersionId) -> StoreResult<()> {
        let mut inner = self.write()?;
        let before = inner.versions.len();
        inner.versions.retain(|v| &v.id != id);
        if inner.versions.len() == before {
            return Err(StoreError::not_found("version", id));
        }
        inner.documents.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.read()?.projects.get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Project>> {
        let mut projects: Vec<Project> = self.read()?.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    async fn upsert(&self, project: &Project) -> StoreResult<()> {
        self.write()?
            .projects
            .insert(project.id.clone(), project.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        let mut inner = self.write()?;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.read()?.jobs.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> StoreResult<Job> {
        let mut inner = self.write()?;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("job", id))?;

        if job.status.is_terminal() {
            return Err(StoreError::TerminalState {
                id: id.to_string(),
                status: job.status,
            });
        }

        let now = Utc::now();
        job.status = status;
        if status == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if status.is_terminal() {
            job.completed_at = Some(now);
        }
        if let Some(message) = error_message {
            job.error_message = Some(message.to_string());
        }
        Ok(job.clone())
    }

    async fn count_for_user(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        statuses: &[JobStatus],
    ) -> StoreResult<u64> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| &j.project_id == project_id && j.user_id == user_id)
            .filter(|j| statuses.contains(&j.status))
            .count() as u64)
    }

    async fn list_for_project(
        &self,
        project_id: &ProjectId,
        statuses: &[JobStatus],
    ) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .read()?
            .jobs
            .values()
            .filter(|j| &j.project_id == project_id && statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.submitted_at);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_manifest::{DocumentKind, SubmissionMode};
    use serde_json::json;

    fn new_version(project: &str) -> NewVersion {
        NewVersion {
            project_id: ProjectId::new(project),
            author: "alice".into(),
            message: "initial".into(),
            content: "kind: Pod".into(),
        }
    }

    fn doc(name: &str) -> NewDocument {
        NewDocument {
            kind: DocumentKind::Pod,
            name: name.into(),
            content: json!({"metadata": {"name": name}}),
        }
    }

    fn job(id: &str, user: &str, status: JobStatus) -> Job {
        Job {
            id: JobId::new(id),
            version_id: VersionId::new("v1"),
            project_id: ProjectId::new("p1"),
            namespace: "proj-p1-alice".into(),
            user_id: user.into(),
            status,
            submission_mode: SubmissionMode::Job,
            queue_name: "default".into(),
            priority: 0,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn version_and_documents_are_stored_together() {
        let store = MemoryStore::new();
        let v = VersionStore::create(&store, new_version("p1"), vec![doc("a"), doc("b")])
            .await
            .unwrap();

        let docs = store.documents(&v.id).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].position, 1);
        assert_eq!(docs[1].name, "b");
        assert_eq!(VersionStore::get(&store, &v.id).await.unwrap(), Some(v));
    }

    #[tokio::test]
    async fn history_is_newest_first_and_scoped_to_project() {
        let store = MemoryStore::new();
        let first = VersionStore::create(&store, new_version("p1"), vec![doc("a")]).await.unwrap();
        VersionStore::create(&store, new_version("p2"), vec![doc("x")]).await.unwrap();
        let second = VersionStore::create(&store, new_version("p1"), vec![doc("a"), doc("b")])
            .await
            .unwrap();

        let history = store.history(&ProjectId::new("p1")).await.unwrap();
        assert_eq!(
            history.iter().map(|v| v.id.clone()).collect::<Vec<_>>(),
            vec![second.id.clone(), first.id.clone()]
        );

        let page = store
            .list_by_project(&ProjectId::new("p1"), Page { limit: 1, offset: 1 })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);
        assert_eq!(page[0].document_count, 1);
    }

    #[tokio::test]
    async fn delete_removes_documents() {
        let store = MemoryStore::new();
        let v = VersionStore::create(&store, new_version("p1"), vec![doc("a")]).await.unwrap();
        store.delete(&v.id).await.unwrap();
        assert!(VersionStore::get(&store, &v.id).await.unwrap().is_none());
        assert!(store.documents(&v.id).await.unwrap().is_empty());
        assert!(matches!(
            store.delete(&v.id).await.unwrap_err(),
            StoreError::NotFound { entity: "version", .. }
        ));
    }

    #[tokio::test]
    async fn terminal_jobs_reject_further_updates() {
        let store = MemoryStore::new();
        JobStore::create(&store, &job("j1", "alice", JobStatus::Running)).await.unwrap();

        let done = store
            .update_status(&JobId::new("j1"), JobStatus::Cancelled, None)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);
        assert!(done.completed_at.is_some());

        let err = store
            .update_status(&JobId::new("j1"), JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::TerminalState {
                status: JobStatus::Cancelled,
                ..
            }
        ));
        let stored = JobStore::get(&store, &JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn running_sets_started_at_and_failure_keeps_message() {
        let store = MemoryStore::new();
        JobStore::create(&store, &job("j1", "alice", JobStatus::Queued)).await.unwrap();
        let running = store
            .update_status(&JobId::new("j1"), JobStatus::Running, None)
            .await
            .unwrap();
        assert!(running.started_at.is_some());

        let failed = store
            .update_status(&JobId::new("j1"), JobStatus::Failed, Some("image pull failed"))
            .await
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("image pull failed"));
    }

    #[tokio::test]
    async fn duplicate_job_is_a_conflict() {
        let store = MemoryStore::new();
        JobStore::create(&store, &job("j1", "alice", JobStatus::Running)).await.unwrap();
        assert!(matches!(
            JobStore::create(&store, &job("j1", "alice", JobStatus::Running)).await.unwrap_err(),
            StoreError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn counts_are_per_user_and_status() {
        let store = MemoryStore::new();
        for (id, user, status) in [
            ("j1", "alice", JobStatus::Running),
            ("j2", "alice", JobStatus::Queued),
            ("j3", "alice", JobStatus::Completed),
            ("j4", "bob", JobStatus::Running),
        ] {
            JobStore::create(&store, &job(id, user, status)).await.unwrap();
        }
        let p1 = ProjectId::new("p1");
        assert_eq!(store.count_for_user(&p1, "alice", &[JobStatus::Running]).await.unwrap(), 1);
        assert_eq!(store.count_for_user(&p1, "alice", JobStatus::PENDING).await.unwrap(), 1);
        assert_eq!(store.list_for_project(&p1, JobStatus::ACTIVE).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn projects_upsert_and_list() {
        let store = MemoryStore::new();
        let mut project = Project {
            id: ProjectId::new("p1"),
            name: "vision".into(),
            group_id: "g1".into(),
            gpu_quota: 2,
            max_concurrent_jobs_per_user: 2,
            max_queued_jobs_per_user: 5,
            max_job_runtime_seconds: 0,
            schedule_windows: vec![],
        };
        store.upsert(&project).await.unwrap();
        project.gpu_quota = 4;
        store.upsert(&project).await.unwrap();

        let stored = ProjectStore::get(&store, &ProjectId::new("p1")).await.unwrap().unwrap();
        assert_eq!(stored.gpu_quota, 4);
        assert_eq!(ProjectStore::list(&store).await.unwrap().len(), 1);
    }
}
