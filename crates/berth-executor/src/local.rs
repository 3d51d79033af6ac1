//! Backend that applies batches straight to the cluster

use std::sync::Arc;

use async_trait::async_trait;
use berth_common::metrics::record_document_applied;
use berth_manifest::SubmissionMode;
use berth_store::{Job, JobId, JobStatus, JobStore, StoreError};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::backend::{map_workflow_phase, ExecutionBackend, SubmitRequest, SubmitResult};
use crate::cluster::ClusterClient;
use crate::error::ExecutorError;

/// Executes jobs directly on the cluster without an external scheduler.
///
/// Documents are applied one by one in manifest order. The first failure
/// marks the job failed and skips the rest; documents already applied are
/// left in place.
pub struct LocalBackend {
    jobs: Arc<dyn JobStore>,
    cluster: Arc<dyn ClusterClient>,
}

impl LocalBackend {
    /// Create a backend over a job store and cluster client
    pub fn new(jobs: Arc<dyn JobStore>, cluster: Arc<dyn ClusterClient>) -> Self {
        Self { jobs, cluster }
    }

    async fn load(&self, job_id: &JobId) -> Result<Job, ExecutorError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ExecutorError::JobNotFound(job_id.clone()))
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    #[instrument(
        skip(self, request),
        fields(job_id = %request.job_id, namespace = %request.namespace)
    )]
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResult, ExecutorError> {
        let now = Utc::now();
        let job = Job {
            id: request.job_id.clone(),
            version_id: request.version_id.clone(),
            project_id: request.project_id.clone(),
            namespace: request.namespace.clone(),
            user_id: request.user_id.clone(),
            status: JobStatus::Running,
            submission_mode: request.mode,
            queue_name: request.queue_name.clone(),
            priority: request.priority,
            submitted_at: now,
            started_at: Some(now),
            completed_at: None,
            error_message: None,
        };
        self.jobs.create(&job).await?;

        for doc in &request.documents {
            if let Err(e) = self.cluster.apply(&request.namespace, &doc.manifest).await {
                let err = ExecutorError::ApplyFailed {
                    kind: doc.kind,
                    name: doc.name.clone(),
                    message: e.to_string(),
                };
                let message = err.to_string();
                if let Err(store_err) = self
                    .jobs
                    .update_status(&request.job_id, JobStatus::Failed, Some(&message))
                    .await
                {
                    warn!(error = %store_err, "failed to mark job failed");
                }
                warn!(kind = %doc.kind, name = %doc.name, error = %e, "apply failed, skipping remaining documents");
                return Err(err);
            }
            record_document_applied(doc.kind.as_str());
        }

        info!(documents = request.documents.len(), user = %request.username, "job submitted");
        Ok(SubmitResult {
            job_id: request.job_id,
            status: JobStatus::Running,
        })
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn cancel(&self, job_id: &JobId) -> Result<(), ExecutorError> {
        let job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Err(ExecutorError::TerminalState {
                id: job_id.clone(),
                status: job.status,
            });
        }

        if !job.namespace.is_empty() {
            if let Err(e) = self
                .cluster
                .delete_workloads(&job.namespace, job.submission_mode, job_id)
                .await
            {
                warn!(namespace = %job.namespace, error = %e, "failed to delete workloads during cancel");
            }
        }

        match self.jobs.update_status(job_id, JobStatus::Cancelled, None).await {
            Ok(_) => {
                info!("job cancelled");
                Ok(())
            }
            Err(StoreError::TerminalState { status, .. }) => Err(ExecutorError::TerminalState {
                id: job_id.clone(),
                status,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn status(&self, job_id: &JobId) -> Result<JobStatus, ExecutorError> {
        let job = self.load(job_id).await?;
        if job.submission_mode != SubmissionMode::Workflow {
            return Ok(job.status);
        }

        let Some(phase) = self.cluster.workflow_phase(&job.namespace, job_id).await? else {
            return Ok(job.status);
        };

        let status = map_workflow_phase(&phase);
        match self.jobs.update_status(job_id, status, None).await {
            Ok(updated) => Ok(updated.status),
            Err(StoreError::TerminalState { status, .. }) => Ok(status),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use berth_common::Error;
    use berth_manifest::DocumentKind;
    use berth_patch::PatchedDocument;
    use berth_store::{MemoryStore, ProjectId, VersionId};
    use serde_json::json;

    fn doc(kind: DocumentKind, name: &str) -> PatchedDocument {
        PatchedDocument {
            kind,
            name: name.to_string(),
            manifest: json!({
                "apiVersion": "v1",
                "kind": kind.as_str(),
                "metadata": {"name": name}
            }),
        }
    }

    fn request(id: &str, mode: SubmissionMode, documents: Vec<PatchedDocument>) -> SubmitRequest {
        SubmitRequest {
            job_id: JobId::new(id),
            version_id: VersionId::new("v1"),
            project_id: ProjectId::new("p1"),
            namespace: "proj-p1-alice".to_string(),
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            documents,
            mode,
            queue_name: "default".to_string(),
            priority: 0,
        }
    }

    fn backend(store: Arc<MemoryStore>, cluster: MockClusterClient) -> LocalBackend {
        LocalBackend::new(store, Arc::new(cluster))
    }

    #[tokio::test]
    async fn submit_applies_in_order_and_persists_running_job() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        let mut seq = mockall::Sequence::new();
        for name in ["config", "train"] {
            cluster
                .expect_apply()
                .withf(move |ns, m| ns == "proj-p1-alice" && m["metadata"]["name"] == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let result = backend(store.clone(), cluster)
            .submit(request(
                "j1",
                SubmissionMode::Job,
                vec![doc(DocumentKind::ConfigMap, "config"), doc(DocumentKind::Job, "train")],
            ))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Running);
        let job = JobStore::get(store.as_ref(), &JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn first_apply_failure_fails_job_and_skips_rest() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_apply()
            .withf(|_, m| m["metadata"]["name"] == "a")
            .times(1)
            .returning(|_, _| Ok(()));
        cluster
            .expect_apply()
            .withf(|_, m| m["metadata"]["name"] == "b")
            .times(1)
            .returning(|_, _| Err(Error::validation("admission webhook denied")));
        cluster
            .expect_apply()
            .withf(|_, m| m["metadata"]["name"] == "c")
            .never();

        let err = backend(store.clone(), cluster)
            .submit(request(
                "j1",
                SubmissionMode::Job,
                vec![
                    doc(DocumentKind::Pod, "a"),
                    doc(DocumentKind::Pod, "b"),
                    doc(DocumentKind::Pod, "c"),
                ],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::ApplyFailed { .. }));

        let job = JobStore::get(store.as_ref(), &JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let message = job.error_message.unwrap();
        assert!(message.starts_with("failed to apply Pod/b:"), "{message}");
    }

    #[tokio::test]
    async fn cancel_terminal_job_does_not_touch_cluster() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        cluster.expect_apply().returning(|_, _| Ok(()));
        cluster.expect_delete_workloads().never();
        let backend = backend(store.clone(), cluster);

        backend
            .submit(request("j1", SubmissionMode::Job, vec![doc(DocumentKind::Job, "train")]))
            .await
            .unwrap();
        store
            .update_status(&JobId::new("j1"), JobStatus::Completed, None)
            .await
            .unwrap();

        let err = backend.cancel(&JobId::new("j1")).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::TerminalState {
                status: JobStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancel_swallows_delete_errors() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        cluster.expect_apply().returning(|_, _| Ok(()));
        cluster
            .expect_delete_workloads()
            .withf(|ns, mode, id| {
                ns == "proj-p1-alice" && *mode == SubmissionMode::Workflow && id.as_str() == "j1"
            })
            .times(1)
            .returning(|_, _, _| Err(Error::internal("connection reset")));
        let backend = backend(store.clone(), cluster);

        backend
            .submit(request(
                "j1",
                SubmissionMode::Workflow,
                vec![doc(DocumentKind::Workflow, "wf")],
            ))
            .await
            .unwrap();
        backend.cancel(&JobId::new("j1")).await.unwrap();

        let job = JobStore::get(store.as_ref(), &JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let backend = backend(Arc::new(MemoryStore::new()), MockClusterClient::new());
        assert!(matches!(
            backend.cancel(&JobId::new("missing")).await.unwrap_err(),
            ExecutorError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn job_mode_status_is_the_persisted_status() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        cluster.expect_apply().returning(|_, _| Ok(()));
        cluster.expect_workflow_phase().never();
        let backend = backend(store, cluster);

        backend
            .submit(request("j1", SubmissionMode::Job, vec![doc(DocumentKind::Job, "train")]))
            .await
            .unwrap();
        assert_eq!(backend.status(&JobId::new("j1")).await.unwrap(), JobStatus::Running);
    }

    #[tokio::test]
    async fn workflow_status_writes_back_mapped_phase() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        cluster.expect_apply().returning(|_, _| Ok(()));
        cluster
            .expect_workflow_phase()
            .returning(|_, _| Ok(Some("Succeeded".to_string())));
        let backend = backend(store.clone(), cluster);

        backend
            .submit(request(
                "j1",
                SubmissionMode::Workflow,
                vec![doc(DocumentKind::Workflow, "wf")],
            ))
            .await
            .unwrap();
        assert_eq!(backend.status(&JobId::new("j1")).await.unwrap(), JobStatus::Completed);

        let job = JobStore::get(store.as_ref(), &JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn workflow_status_keeps_terminal_state() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        cluster.expect_apply().returning(|_, _| Ok(()));
        cluster
            .expect_workflow_phase()
            .returning(|_, _| Ok(Some("Running".to_string())));
        let backend = backend(store.clone(), cluster);

        backend
            .submit(request(
                "j1",
                SubmissionMode::Workflow,
                vec![doc(DocumentKind::Workflow, "wf")],
            ))
            .await
            .unwrap();
        store
            .update_status(&JobId::new("j1"), JobStatus::Cancelled, None)
            .await
            .unwrap();

        assert_eq!(backend.status(&JobId::new("j1")).await.unwrap(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn workflow_without_phase_reports_persisted_status() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = MockClusterClient::new();
        cluster.expect_apply().returning(|_, _| Ok(()));
        cluster.expect_workflow_phase().returning(|_, _| Ok(None));
        let backend = backend(store, cluster);

        backend
            .submit(request(
                "j1",
                SubmissionMode::Workflow,
                vec![doc(DocumentKind::Workflow, "wf")],
            ))
            .await
            .unwrap();
        assert_eq!(backend.status(&JobId::new("j1")).await.unwrap(), JobStatus::Running);
    }
}
