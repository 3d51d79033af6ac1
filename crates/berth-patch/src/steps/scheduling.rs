//! Priority class, scheduler and queue annotations

use serde_json::{Map, Value};

use crate::context::{PatchConfig, PatchContext};
use crate::view::{child, PodSpecMut};

/// Set priority class and, with an alternate scheduler, the scheduler name
pub fn apply_spec(pod: &mut PodSpecMut<'_>, config: &PatchConfig) {
    let fields = pod.fields();
    if let Some(class) = &config.priority_class_name {
        fields.insert(
            "priorityClassName".to_string(),
            Value::String(class.clone()),
        );
    }
    if let Some(alt) = &config.alternate_scheduler {
        fields.insert(
            "schedulerName".to_string(),
            Value::String(alt.scheduler_name.clone()),
        );
    }
}

/// Queue and preemption annotations on the pod metadata (alternate scheduler only)
pub fn apply_metadata(metadata: &mut Map<String, Value>, config: &PatchConfig, ctx: &PatchContext) {
    let Some(alt) = &config.alternate_scheduler else {
        return;
    };
    let annotations = child(metadata, "annotations");
    annotations.insert(
        alt.queue_annotation_key.clone(),
        Value::String(ctx.queue_name.clone()),
    );
    annotations.insert(
        alt.preemptible_annotation_key.clone(),
        Value::String(alt.preemptible.to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AlternateScheduler;
    use serde_json::json;

    fn alt_config() -> PatchConfig {
        PatchConfig {
            priority_class_name: Some("batch-low".into()),
            alternate_scheduler: Some(AlternateScheduler {
                scheduler_name: "flash-scheduler".into(),
                queue_annotation_key: "scheduling.flash-sched.io/queue-name".into(),
                preemptible_annotation_key: "scheduling.flash-sched.io/preemptable".into(),
                preemptible: true,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn default_scheduler_only_gets_priority_class() {
        let mut spec = json!({"containers": []});
        let config = PatchConfig {
            priority_class_name: Some("batch-low".into()),
            ..Default::default()
        };
        apply_spec(&mut PodSpecMut::new(&mut spec), &config);
        assert_eq!(spec["priorityClassName"], "batch-low");
        assert!(spec.get("schedulerName").is_none());

        let mut meta = Map::new();
        apply_metadata(&mut meta, &config, &PatchContext::default());
        assert!(meta.is_empty());
    }

    #[test]
    fn alternate_scheduler_sets_name_and_annotations() {
        let mut spec = json!({"containers": []});
        apply_spec(&mut PodSpecMut::new(&mut spec), &alt_config());
        assert_eq!(spec["schedulerName"], "flash-scheduler");

        let ctx = PatchContext {
            queue_name: "gpu-interactive".into(),
            ..Default::default()
        };
        let mut meta = Map::new();
        apply_metadata(&mut meta, &alt_config(), &ctx);
        assert_eq!(
            Value::Object(meta)["annotations"],
            json!({
                "scheduling.flash-sched.io/queue-name": "gpu-interactive",
                "scheduling.flash-sched.io/preemptable": "true"
            })
        );
    }
}
