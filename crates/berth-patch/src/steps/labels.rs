//! Identity labels

use berth_common::{JOB_ID_LABEL, VERSION_ID_LABEL};
use berth_manifest::PodSpecLocation;
use serde_json::{Map, Value};

use crate::context::PatchContext;
use crate::view::{child, object_at};

/// Stamp job and version ids on the document and on each pod template
pub fn apply(doc: &mut Value, pods: &[PodSpecLocation], ctx: &PatchContext) {
    if let Some(meta) = object_at(doc, "/metadata") {
        stamp(meta, ctx);
    }
    for pod in pods {
        if let Some(meta) = object_at(doc, &pod.metadata) {
            stamp(meta, ctx);
        }
    }
}

fn stamp(metadata: &mut Map<String, Value>, ctx: &PatchContext) {
    let labels = child(metadata, "labels");
    labels.insert(JOB_ID_LABEL.to_string(), Value::String(ctx.job_id.clone()));
    labels.insert(
        VERSION_ID_LABEL.to_string(),
        Value::String(ctx.version_id.clone()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_manifest::PodSpecLocator;
    use serde_json::json;

    fn ctx() -> PatchContext {
        PatchContext {
            job_id: "job-1".into(),
            version_id: "ver-1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn labels_document_and_cronjob_template() {
        let mut doc = json!({
            "metadata": {"name": "nightly", "labels": {"team": "ml"}},
            "spec": {"jobTemplate": {"spec": {"template": {"spec": {"containers": []}}}}}
        });
        let pods = PodSpecLocator::locate(&doc);
        apply(&mut doc, &pods, &ctx());

        assert_eq!(doc["metadata"]["labels"]["team"], "ml");
        assert_eq!(doc["metadata"]["labels"][JOB_ID_LABEL], "job-1");
        let template = &doc["spec"]["jobTemplate"]["spec"]["template"]["metadata"]["labels"];
        assert_eq!(template[JOB_ID_LABEL], "job-1");
        assert_eq!(template[VERSION_ID_LABEL], "ver-1");
    }

    #[test]
    fn documents_without_pods_get_top_level_labels_only() {
        let mut doc = json!({"metadata": {"name": "cfg"}, "data": {}});
        apply(&mut doc, &[], &ctx());
        assert_eq!(doc["metadata"]["labels"][VERSION_ID_LABEL], "ver-1");
        assert!(doc.get("spec").is_none());
    }
}
