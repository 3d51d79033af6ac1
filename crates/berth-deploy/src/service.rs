//! Deploy orchestration
//!
//! [`DeployService`] ties the pipeline together: versions are parsed and
//! stored, deploys are admitted against schedule and quota before anything
//! changes, volumes are bound, every document is patched once, and the batch
//! goes to the execution backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use berth_common::metrics::{record_cancellation, record_deploy, DeployOutcome};
use berth_common::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, PROJECT_ID_LABEL};
use berth_executor::{ClusterClient, ExecutionBackend, SubmitRequest, SubmitResult};
use berth_manifest::{parse_manifest, resolve_mode, SubmissionMode};
use berth_patch::{
    ImageRules, PatchConfig, PatchContext, PatchEngine, PatchedDocument, ProjectLimits,
};
use berth_store::{
    Document, Job, JobId, JobStatus, JobStore, NewDocument, NewVersion, Page, Project, ProjectId,
    ProjectStore, Version, VersionId, VersionStore, VersionSummary,
};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::admission::admit;
use crate::audit::{AuditEvent, AuditQueue};
use crate::binder::{namespace_name, placeholders, Binder, BinderConfig, TenancyDirectory};
use crate::error::{DeployError, DeployResult, ErrorCategory};
use crate::schedule::is_allowed;
use crate::Actor;

#[cfg(test)]
use mockall::automock;

/// Default scheduler queue
pub const DEFAULT_QUEUE: &str = "default";

/// Per-project image allow-lists
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Images the project may run
    async fn rules(&self, project_id: &ProjectId) -> berth_common::Result<ImageRules>;
}

/// The three stores the service reads and writes
#[derive(Clone)]
pub struct Stores {
    /// Versions and documents
    pub versions: Arc<dyn VersionStore>,
    /// Projects
    pub projects: Arc<dyn ProjectStore>,
    /// Jobs
    pub jobs: Arc<dyn JobStore>,
}

impl Stores {
    /// All three backed by one store
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: VersionStore + ProjectStore + JobStore + 'static,
    {
        Self {
            versions: store.clone(),
            projects: store.clone(),
            jobs: store,
        }
    }
}

/// Service-wide settings
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Patch engine settings
    pub patch: PatchConfig,
    /// Storage naming
    pub binder: BinderConfig,
    /// Queue used when a deploy names none
    pub default_queue: String,
    /// Priority used when a deploy names none
    pub default_priority: i32,
    /// Offset schedule windows are written in
    pub schedule_offset: FixedOffset,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            patch: PatchConfig::default(),
            binder: BinderConfig::default(),
            default_queue: DEFAULT_QUEUE.to_string(),
            default_priority: 0,
            schedule_offset: Utc.fix(),
        }
    }
}

/// A request to run a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Version to deploy
    pub version_id: VersionId,
    /// Keep only this mode's workloads; absent infers it from the documents
    #[serde(default)]
    pub mode: Option<SubmissionMode>,
    /// Scheduler queue
    #[serde(default)]
    pub queue_name: Option<String>,
    /// Scheduling priority
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Deploy pipeline entry points
pub struct DeployService {
    stores: Stores,
    backend: Arc<dyn ExecutionBackend>,
    cluster: Arc<dyn ClusterClient>,
    binder: Binder,
    images: Arc<dyn ImageCatalog>,
    patcher: PatchEngine,
    audit: AuditQueue,
    config: DeployConfig,
}

impl DeployService {
    /// Wire the service
    pub fn new(
        stores: Stores,
        backend: Arc<dyn ExecutionBackend>,
        cluster: Arc<dyn ClusterClient>,
        directory: Arc<dyn TenancyDirectory>,
        images: Arc<dyn ImageCatalog>,
        audit: AuditQueue,
        config: DeployConfig,
    ) -> Self {
        Self {
            binder: Binder::new(directory, cluster.clone(), config.binder.clone()),
            patcher: PatchEngine::new(config.patch.clone()),
            stores,
            backend,
            cluster,
            images,
            audit,
            config,
        }
    }

    async fn project(&self, id: &ProjectId) -> DeployResult<Project> {
        self.stores
            .projects
            .get(id)
            .await?
            .ok_or_else(|| DeployError::not_found("project", id))
    }

    async fn version_record(&self, id: &VersionId) -> DeployResult<Version> {
        self.stores
            .versions
            .get(id)
            .await?
            .ok_or_else(|| DeployError::not_found("version", id))
    }

    async fn owned_job(&self, actor: &Actor, id: &JobId) -> DeployResult<Job> {
        let job = self
            .stores
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| DeployError::not_found("job", id))?;
        if !actor.is_admin && job.user_id != actor.user_id {
            return Err(DeployError::Forbidden(format!(
                "job {id} belongs to another user"
            )));
        }
        Ok(job)
    }

    /// Parse, validate and store a manifest as a new version
    #[instrument(
        skip(self, actor, content),
        fields(project_id = %project_id, user_id = %actor.user_id)
    )]
    pub async fn create_version(
        &self,
        actor: &Actor,
        project_id: &ProjectId,
        message: &str,
        content: &str,
    ) -> DeployResult<Version> {
        self.project(project_id).await?;
        let documents: Vec<NewDocument> = parse_manifest(content)?
            .into_iter()
            .map(NewDocument::from)
            .collect();
        let count = documents.len();

        let version = self
            .stores
            .versions
            .create(
                NewVersion {
                    project_id: project_id.clone(),
                    author: actor.username.clone(),
                    message: message.to_string(),
                    content: content.to_string(),
                },
                documents,
            )
            .await?;

        info!(version_id = %version.id, documents = count, "version created");
        self.audit.record(
            AuditEvent::new("version.create", &actor.user_id, "version", version.id.as_str())
                .with_details(json!({"project_id": project_id, "documents": count})),
        );
        Ok(version)
    }

    /// A version and its documents
    pub async fn version(&self, id: &VersionId) -> DeployResult<(Version, Vec<Document>)> {
        let version = self.version_record(id).await?;
        let documents = self.stores.versions.documents(id).await?;
        Ok((version, documents))
    }

    /// Version summaries of a project, newest first
    pub async fn list_versions(
        &self,
        project_id: &ProjectId,
        page: Page,
    ) -> DeployResult<Vec<VersionSummary>> {
        self.project(project_id).await?;
        Ok(self.stores.versions.list_by_project(project_id, page).await?)
    }

    /// Every version of a project, newest first
    pub async fn history(&self, project_id: &ProjectId) -> DeployResult<Vec<Version>> {
        self.project(project_id).await?;
        Ok(self.stores.versions.history(project_id).await?)
    }

    /// Run a version for the actor
    #[instrument(
        skip(self, actor, request),
        fields(version_id = %request.version_id, user_id = %actor.user_id)
    )]
    pub async fn deploy(
        &self,
        actor: &Actor,
        request: DeployRequest,
    ) -> DeployResult<SubmitResult> {
        let result = self.run_deploy(actor, request).await;
        let outcome = match &result {
            Ok(_) => DeployOutcome::Submitted,
            Err(e) => match e.category() {
                ErrorCategory::Validation => DeployOutcome::Invalid,
                ErrorCategory::Rejected => DeployOutcome::Rejected,
                _ => DeployOutcome::Failed,
            },
        };
        record_deploy(outcome);
        if let Err(e) = &result {
            warn!(error = %e, outcome = outcome.as_str(), "deploy failed");
        }
        result
    }

    async fn run_deploy(
        &self,
        actor: &Actor,
        request: DeployRequest,
    ) -> DeployResult<SubmitResult> {
        let version = self.version_record(&request.version_id).await?;
        let documents = self.stores.versions.documents(&version.id).await?;
        let (mode, documents) = resolve_mode(documents, request.mode)?;
        let project = self.project(&version.project_id).await?;

        // Admission runs before anything is created.
        let now = Utc::now().with_timezone(&self.config.schedule_offset);
        let allowed = is_allowed(&project.schedule_windows, &now).map_err(|source| {
            DeployError::Schedule {
                project_id: project.id.to_string(),
                source,
            }
        })?;
        if !allowed {
            return Err(DeployError::OutsideSchedule {
                project_id: project.id.to_string(),
            });
        }
        admit(self.stores.jobs.as_ref(), &project, &actor.user_id).await?;

        let namespace = namespace_name(&project.id, &actor.username);
        self.cluster
            .ensure_namespace(&namespace, &namespace_labels(&project.id))
            .await?;
        let binding = self.binder.bind(&project, actor, &namespace, &documents).await?;
        let images = self.images.rules(&project.id).await?;

        let job_id = JobId::generate();
        let queue_name = request
            .queue_name
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| self.config.default_queue.clone());
        let ctx = PatchContext {
            job_id: job_id.to_string(),
            version_id: version.id.to_string(),
            project: ProjectLimits {
                project_id: project.id.to_string(),
                gpu_quota: project.gpu_quota,
                max_job_runtime_seconds: project.max_job_runtime_seconds,
            },
            actor_is_admin: actor.is_admin,
            enforce_read_only: binding.read_only,
            shared_claim: binding.group_volume.clone(),
            placeholders: placeholders(&project.id, actor, &namespace, &binding),
            queue_name: queue_name.clone(),
            images,
        };

        let patched = documents
            .iter()
            .map(|doc| self.patcher.patch(doc.kind, &doc.content, &ctx))
            .collect::<Result<Vec<PatchedDocument>, _>>()?;
        let count = patched.len();

        let result = self
            .backend
            .submit(SubmitRequest {
                job_id: job_id.clone(),
                version_id: version.id.clone(),
                project_id: project.id.clone(),
                namespace: namespace.clone(),
                user_id: actor.user_id.clone(),
                username: actor.username.clone(),
                documents: patched,
                mode,
                queue_name,
                priority: request.priority.unwrap_or(self.config.default_priority),
            })
            .await?;

        info!(job_id = %job_id, namespace = %namespace, documents = count, "deploy submitted");
        self.audit.record(
            AuditEvent::new("job.submit", &actor.user_id, "job", job_id.as_str()).with_details(
                json!({
                    "version_id": version.id,
                    "project_id": project.id,
                    "namespace": namespace,
                    "mode": mode,
                    "documents": count,
                }),
            ),
        );
        Ok(result)
    }

    /// The actor's job record
    pub async fn job(&self, actor: &Actor, id: &JobId) -> DeployResult<Job> {
        self.owned_job(actor, id).await
    }

    /// Current state of the actor's job
    pub async fn status(&self, actor: &Actor, id: &JobId) -> DeployResult<JobStatus> {
        self.owned_job(actor, id).await?;
        Ok(self.backend.status(id).await?)
    }

    /// Cancel the actor's job
    #[instrument(skip(self, actor), fields(job_id = %id, user_id = %actor.user_id))]
    pub async fn cancel(&self, actor: &Actor, id: &JobId) -> DeployResult<()> {
        self.owned_job(actor, id).await?;
        self.backend.cancel(id).await?;
        record_cancellation("user");
        self.audit
            .record(AuditEvent::new("job.cancel", &actor.user_id, "job", id.as_str()));
        Ok(())
    }

    /// Delete the objects of a version from the actor's namespace.
    ///
    /// Deletion is best effort: failures are logged and skipped. Returns how
    /// many documents were deleted.
    #[instrument(skip(self, actor), fields(version_id = %id, user_id = %actor.user_id))]
    pub async fn teardown_instance(&self, actor: &Actor, id: &VersionId) -> DeployResult<usize> {
        let version = self.version_record(id).await?;
        let project = self.project(&version.project_id).await?;
        let documents = self.stores.versions.documents(id).await?;

        let namespace = namespace_name(&project.id, &actor.username);
        let binding = self.binder.expected_binding(&project, actor).await?;
        let values = placeholders(&project.id, actor, &namespace, &binding);

        let mut deleted = 0;
        for doc in documents.iter().rev() {
            let manifest = match resolve(&values, &doc.content) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(kind = %doc.kind, name = %doc.name, error = %e, "skipping document during teardown");
                    continue;
                }
            };
            match self.cluster.delete(&namespace, &manifest).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(kind = %doc.kind, name = %doc.name, error = %e, "failed to delete resource during teardown");
                }
            }
        }

        info!(namespace = %namespace, deleted, "instance torn down");
        self.audit.record(
            AuditEvent::new("version.teardown", &actor.user_id, "version", id.as_str())
                .with_details(json!({"namespace": namespace, "deleted": deleted})),
        );
        Ok(deleted)
    }

    /// Tear down the actor's instance and delete the version
    pub async fn delete_version(&self, actor: &Actor, id: &VersionId) -> DeployResult<()> {
        let version = self.version_record(id).await?;
        if !actor.is_admin && version.author != actor.username {
            return Err(DeployError::Forbidden(format!(
                "version {id} was created by another user"
            )));
        }
        self.teardown_instance(actor, id).await?;
        self.stores.versions.delete(id).await?;

        info!(version_id = %id, "version deleted");
        self.audit
            .record(AuditEvent::new("version.delete", &actor.user_id, "version", id.as_str()));
        Ok(())
    }
}

fn namespace_labels(project_id: &ProjectId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (PROJECT_ID_LABEL.to_string(), berth_common::naming::truncate_label(project_id.as_str())),
    ])
}

fn resolve(values: &berth_patch::Placeholders, content: &Value) -> DeployResult<Value> {
    let text = values.substitute(&content.to_string())?;
    serde_json::from_str(&text).map_err(|e| DeployError::Invalid(e.to_string()))
}
