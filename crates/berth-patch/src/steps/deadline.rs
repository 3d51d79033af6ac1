//! Runtime deadline for batch workloads

use berth_manifest::DocumentKind;
use serde_json::Value;

use crate::view::{as_object, child};

/// Set `activeDeadlineSeconds` on Jobs and CronJob job templates.
///
/// The project maximum replaces any deadline the user wrote.
pub fn apply(kind: DocumentKind, doc: &mut Value, max_runtime_seconds: i64) {
    if max_runtime_seconds <= 0 {
        return;
    }
    let job_spec = match kind {
        DocumentKind::Job => child(as_object(doc), "spec"),
        DocumentKind::CronJob => {
            let spec = child(as_object(doc), "spec");
            child(child(spec, "jobTemplate"), "spec")
        }
        _ => return,
    };

    job_spec.insert(
        "activeDeadlineSeconds".to_string(),
        Value::from(max_runtime_seconds),
    );
}
