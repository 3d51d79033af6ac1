//! Cluster access used by backends and the deploy service

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use berth_common::kube_utils::{
    build_api_resource, ensure_namespace_with_labels, gvk, is_not_found, FIELD_MANAGER,
};
use berth_common::naming::truncate_label;
use berth_common::{Error, Result, JOB_ID_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use berth_manifest::SubmissionMode;
use berth_store::JobId;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

const WORKFLOW_API_VERSION: &str = "argoproj.io/v1alpha1";

/// Expose an existing volume claim in another namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBindRequest {
    /// Namespace holding the source claim
    pub source_namespace: String,
    /// Source claim name
    pub source_claim: String,
    /// Tenant namespace
    pub target_namespace: String,
    /// Claim name to create in the tenant namespace
    pub target_claim: String,
}

/// Trait abstracting the cluster operations Berth performs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or update a namespace with labels
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>)
        -> Result<()>;

    /// Server-side apply one manifest into a namespace
    async fn apply(&self, namespace: &str, manifest: &Value) -> Result<()>;

    /// Delete the object a manifest describes; a missing object is not an error
    async fn delete(&self, namespace: &str, manifest: &Value) -> Result<()>;

    /// Delete the workload objects labelled with a job id
    ///
    /// Job mode removes Jobs, CronJobs and Pods and attempts all three before
    /// reporting a failure. Workflow mode removes Workflows.
    async fn delete_workloads(
        &self,
        namespace: &str,
        mode: SubmissionMode,
        job_id: &JobId,
    ) -> Result<()>;

    /// Phase of the Argo workflow labelled with a job id, if one exists
    async fn workflow_phase(&self, namespace: &str, job_id: &JobId) -> Result<Option<String>>;

    /// Bind an existing volume into a tenant namespace (idempotent)
    async fn bind_volume(&self, request: &VolumeBindRequest) -> Result<()>;
}

/// Real cluster client implementation using kube-rs
pub struct KubeClusterClient {
    client: Client,
    resources: Mutex<HashMap<String, ApiResource>>,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the ApiResource for an apiVersion and kind.
    ///
    /// Discovery results are cached per process. If the server does not know
    /// the kind (e.g. a CRD installed after startup), falls back to local
    /// pluralization.
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ApiResource> {
        let key = format!("{api_version}/{kind}");
        if let Some(ar) = self.cached(&key)? {
            return Ok(ar);
        }

        let ar = match kube::discovery::pinned_kind(&self.client, &gvk(api_version, kind)).await {
            Ok((ar, _caps)) => ar,
            Err(e) => {
                debug!(
                    api_version = %api_version,
                    kind = %kind,
                    error = %e,
                    "Resource not found in discovery, using fallback pluralization"
                );
                build_api_resource(api_version, kind)
            }
        };

        self.resources
            .lock()
            .map_err(|_| Error::internal_with_context("discovery", "cache lock poisoned"))?
            .insert(key, ar.clone());
        Ok(ar)
    }

    fn cached(&self, key: &str) -> Result<Option<ApiResource>> {
        Ok(self
            .resources
            .lock()
            .map_err(|_| Error::internal_with_context("discovery", "cache lock poisoned"))?
            .get(key)
            .cloned())
    }

    async fn dynamic_api(
        &self,
        namespace: &str,
        manifest: &Value,
    ) -> Result<(Api<DynamicObject>, String)> {
        let api_version = manifest_field(manifest, "/apiVersion")?;
        let kind = manifest_field(manifest, "/kind")?;
        let name = manifest_field(manifest, "/metadata/name")?;
        let ar = self.resolve(api_version, kind).await?;
        Ok((
            Api::namespaced_with(self.client.clone(), namespace, &ar),
            name.to_string(),
        ))
    }

    fn workflow_api(&self, namespace: &str) -> Api<DynamicObject> {
        let ar = build_api_resource(WORKFLOW_API_VERSION, "Workflow");
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }
}

fn manifest_field<'a>(manifest: &'a Value, pointer: &str) -> Result<&'a str> {
    manifest
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            let field = pointer.trim_start_matches('/').replace('/', ".");
            Error::validation_for_field(field.clone(), format!("missing field '{field}'"))
        })
}

fn dynamic_object(manifest: &Value) -> Result<DynamicObject> {
    serde_json::from_value(manifest.clone()).map_err(|e| {
        let kind = manifest.get("kind").and_then(Value::as_str).unwrap_or_default();
        Error::serialization_for_kind(kind, e.to_string())
    })
}

fn job_selector(job_id: &JobId) -> ListParams {
    ListParams::default().labels(&format!("{JOB_ID_LABEL}={job_id}"))
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        ensure_namespace_with_labels(&self.client, name, labels).await?;
        Ok(())
    }

    async fn apply(&self, namespace: &str, manifest: &Value) -> Result<()> {
        let (api, name) = self.dynamic_api(namespace, manifest).await?;
        let obj = dynamic_object(manifest)?;

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await?;

        info!(
            namespace = %namespace,
            kind = manifest.get("kind").and_then(serde_json::Value::as_str).unwrap_or_default(),
            name = %name,
            "Applied resource"
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, manifest: &Value) -> Result<()> {
        let (api, name) = self.dynamic_api(namespace, manifest).await?;
        match api.delete(&name, &DeleteParams::background()).await {
            Ok(_) => {
                debug!(namespace = %namespace, name = %name, "Deleted resource");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_workloads(
        &self,
        namespace: &str,
        mode: SubmissionMode,
        job_id: &JobId,
    ) -> Result<()> {
        let dp = DeleteParams::background();
        let lp = job_selector(job_id);

        match mode {
            SubmissionMode::Job => {
                let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                let cron_jobs: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
                let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                first_error(
                    namespace,
                    [
                        ("Job", jobs.delete_collection(&dp, &lp).await.map(drop)),
                        ("CronJob", cron_jobs.delete_collection(&dp, &lp).await.map(drop)),
                        ("Pod", pods.delete_collection(&dp, &lp).await.map(drop)),
                    ],
                )?;
            }
            SubmissionMode::Workflow => {
                self.workflow_api(namespace).delete_collection(&dp, &lp).await?;
            }
        }

        debug!(namespace = %namespace, job_id = %job_id, mode = %mode, "Deleted workloads");
        Ok(())
    }

    async fn workflow_phase(&self, namespace: &str, job_id: &JobId) -> Result<Option<String>> {
        let list = self.workflow_api(namespace).list(&job_selector(job_id)).await?;
        Ok(list.items.iter().find_map(|wf| {
            wf.data
                .pointer("/status/phase")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|phase| !phase.is_empty())
                .map(str::to_string)
        }))
    }

    async fn bind_volume(&self, request: &VolumeBindRequest) -> Result<()> {
        let target_claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &request.target_namespace);
        if target_claims.get_opt(&request.target_claim).await?.is_some() {
            return Ok(());
        }

        let source_claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &request.source_namespace);
        let source = source_claims.get(&request.source_claim).await?;
        let source_spec = source.spec.unwrap_or_default();
        let volume_name = source_spec.volume_name.clone().ok_or_else(|| {
            Error::validation(format!(
                "claim {}/{} is not bound to a volume",
                request.source_namespace, request.source_claim
            ))
        })?;

        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        let source_volume = volumes.get(&volume_name).await?;

        // A second volume pointing at the same backing storage, pre-bound to
        // the tenant claim.
        let pv_name = truncate_label(&format!(
            "{}-{}",
            request.target_namespace, request.target_claim
        ));
        let mut pv_spec = source_volume.spec.unwrap_or_default();
        pv_spec.claim_ref = Some(ObjectReference {
            namespace: Some(request.target_namespace.clone()),
            name: Some(request.target_claim.clone()),
            ..Default::default()
        });
        pv_spec.persistent_volume_reclaim_policy = Some("Retain".to_string());
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some(pv_name.clone()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            spec: Some(pv_spec),
            status: None,
        };
        volumes
            .patch(&pv_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&pv))
            .await?;

        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(request.target_claim.clone()),
                namespace: Some(request.target_namespace.clone()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: source_spec.access_modes,
                resources: source_spec.resources,
                storage_class_name: source_spec.storage_class_name,
                volume_name: Some(pv_name.clone()),
                ..Default::default()
            }),
            status: None,
        };
        target_claims
            .patch(
                &request.target_claim,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&pvc),
            )
            .await?;

        info!(
            source = %format!("{}/{}", request.source_namespace, request.source_claim),
            target = %format!("{}/{}", request.target_namespace, request.target_claim),
            volume = %pv_name,
            "Bound volume into namespace"
        );
        Ok(())
    }
}

/// Run every collection delete and report the first failure
fn first_error<E>(
    namespace: &str,
    results: impl IntoIterator<Item = (&'static str, std::result::Result<(), E>)>,
) -> Result<()>
where
    E: Into<Error> + std::fmt::Display,
{
    let mut first = None;
    for (kind, result) in results {
        if let Err(e) = result {
            warn!(namespace = %namespace, kind = kind, error = %e, "Failed to delete workloads");
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
