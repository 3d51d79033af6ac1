//! The patch pipeline

use berth_manifest::{DocumentKind, PodSpecLocator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::context::{PatchConfig, PatchContext};
use crate::error::PatchError;
use crate::steps::{deadline, gpu, images, labels, scheduling, security, volumes};
use crate::view::{object_at, PodSpecMut};

/// A document ready to be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchedDocument {
    /// Resource kind
    pub kind: DocumentKind,
    /// `metadata.name` after substitution
    pub name: String,
    /// Final object
    pub manifest: Value,
}

/// Applies tenancy and quota policy to documents.
///
/// Pure: no I/O, all inputs come from [`PatchConfig`] and [`PatchContext`].
#[derive(Debug, Clone, Default)]
pub struct PatchEngine {
    config: PatchConfig,
}

impl PatchEngine {
    /// Create an engine with process-wide settings
    pub fn new(config: PatchConfig) -> Self {
        Self { config }
    }

    /// Process-wide settings
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Patch one document.
    ///
    /// Placeholders are substituted on the serialized form, which is then
    /// parsed once; every other step mutates that single tree.
    #[instrument(skip(self, content, ctx), fields(job_id = %ctx.job_id))]
    pub fn patch(
        &self,
        kind: DocumentKind,
        content: &Value,
        ctx: &PatchContext,
    ) -> Result<PatchedDocument, PatchError> {
        let text = ctx.placeholders.substitute(&serde_json::to_string(content)?)?;
        let mut doc: Value = serde_json::from_str(&text)?;

        let pods = PodSpecLocator::locate(&doc);
        labels::apply(&mut doc, &pods, ctx);
        deadline::apply(kind, &mut doc, ctx.project.max_job_runtime_seconds);

        for location in &pods {
            if let Some(spec) = doc.pointer_mut(&location.spec) {
                let mut pod = PodSpecMut::new(spec);
                images::apply(&mut pod, ctx, &self.config)?;
                volumes::apply(&mut pod, ctx);
                gpu::apply(&mut pod, ctx.project.gpu_quota)?;
                security::apply(&mut pod, &self.config);
                scheduling::apply_spec(&mut pod, &self.config);
            }
            if let Some(metadata) = object_at(&mut doc, &location.metadata) {
                scheduling::apply_metadata(metadata, &self.config, ctx);
            }
        }

        let name = doc
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(%kind, %name, pod_specs = pods.len(), "patched document");

        Ok(PatchedDocument {
            kind,
            name,
            manifest: doc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AlternateScheduler, ImageRef, ImageRules, ProjectLimits};
    use crate::placeholder::Placeholders;
    use berth_common::{GPU_RESOURCE, JOB_ID_LABEL};
    use serde_json::json;

    fn engine() -> PatchEngine {
        PatchEngine::new(PatchConfig {
            registry_prefix: Some("harbor.local/".into()),
            priority_class_name: Some("tenant-batch".into()),
            alternate_scheduler: Some(AlternateScheduler {
                scheduler_name: "flash-scheduler".into(),
                queue_annotation_key: "q".into(),
                preemptible_annotation_key: "p".into(),
                preemptible: false,
            }),
            ..Default::default()
        })
    }

    fn ctx() -> PatchContext {
        let mut images = ImageRules::default();
        images.allow_mirrored(ImageRef::new("pytorch", "2.1"));
        let placeholders: Placeholders = [
            ("namespace", "proj-p1-alice"),
            ("groupVolume", "group-data"),
        ]
        .into_iter()
        .collect();
        PatchContext {
            job_id: "job-42".into(),
            version_id: "ver-7".into(),
            project: ProjectLimits {
                project_id: "p1".into(),
                gpu_quota: 2,
                max_job_runtime_seconds: 7200,
            },
            enforce_read_only: true,
            shared_claim: Some("group-data".into()),
            placeholders,
            queue_name: "default-batch".into(),
            images,
            ..Default::default()
        }
    }

    fn job() -> Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "train", "namespace": "{{namespace}}"},
            "spec": {"template": {"spec": {
                "volumes": [{"name": "data", "persistentVolumeClaim": {"claimName": "{{groupVolume}}"}}],
                "containers": [{
                    "name": "main",
                    "image": "pytorch:2.1",
                    "volumeMounts": [{"name": "data", "mountPath": "/data"}],
                    "resources": {"requests": {GPU_RESOURCE: "4"}}
                }]
            }}}
        })
    }

    #[test]
    fn full_pipeline_on_a_job() {
        let patched = engine().patch(DocumentKind::Job, &job(), &ctx()).unwrap();
        let m = &patched.manifest;
        let pod = &m["spec"]["template"]["spec"];

        assert_eq!(patched.name, "train");
        assert_eq!(m["metadata"]["namespace"], "proj-p1-alice");
        assert_eq!(m["metadata"]["labels"][JOB_ID_LABEL], "job-42");
        assert_eq!(m["spec"]["template"]["metadata"]["labels"][JOB_ID_LABEL], "job-42");
        assert_eq!(m["spec"]["template"]["metadata"]["annotations"]["q"], "default-batch");
        assert_eq!(m["spec"]["template"]["metadata"]["annotations"]["p"], "false");
        assert_eq!(m["spec"]["activeDeadlineSeconds"], 7200);
        assert_eq!(pod["containers"][0]["image"], "harbor.local/pytorch:2.1");
        assert_eq!(pod["containers"][0]["volumeMounts"][0]["readOnly"], true);
        assert_eq!(pod["containers"][0]["resources"]["requests"][GPU_RESOURCE], "2");
        assert_eq!(pod["containers"][0]["resources"]["limits"][GPU_RESOURCE], "2");
        assert_eq!(pod["securityContext"]["fsGroup"], 1000);
        assert_eq!(pod["priorityClassName"], "tenant-batch");
        assert_eq!(pod["schedulerName"], "flash-scheduler");
    }

    #[test]
    fn input_document_is_not_mutated() {
        let original = job();
        engine().patch(DocumentKind::Job, &original, &ctx()).unwrap();
        assert_eq!(original, job());
    }

    #[test]
    fn failing_step_aborts_document() {
        let mut ctx = ctx();
        ctx.project.gpu_quota = 0;
        assert_eq!(
            engine().patch(DocumentKind::Job, &job(), &ctx).unwrap_err(),
            PatchError::InvalidGpuQuota { quota: 0 }
        );
    }

    #[test]
    fn unresolved_placeholder_aborts_document() {
        let mut ctx = ctx();
        ctx.placeholders = Placeholders::new();
        assert!(matches!(
            engine().patch(DocumentKind::Job, &job(), &ctx).unwrap_err(),
            PatchError::UnresolvedPlaceholder { .. }
        ));
    }

    #[test]
    fn supporting_documents_only_get_labels() {
        let cm = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg"}, "data": {"a": "b"}});
        let patched = engine().patch(DocumentKind::ConfigMap, &cm, &ctx()).unwrap();
        assert_eq!(patched.manifest["metadata"]["labels"][JOB_ID_LABEL], "job-42");
        assert_eq!(patched.manifest["data"], json!({"a": "b"}));
        assert!(patched.manifest.get("spec").is_none());
    }
}
