//! Read-only enforcement for the shared group volume

use std::collections::HashSet;

use serde_json::Value;

use crate::context::PatchContext;
use crate::view::{as_object, PodSpecMut};

/// Force `readOnly: true` on every mount of a volume backed by the shared claim
pub fn apply(pod: &mut PodSpecMut<'_>, ctx: &PatchContext) {
    if !ctx.enforce_read_only {
        return;
    }
    let Some(claim) = ctx.shared_claim.as_deref() else {
        return;
    };

    let volumes: HashSet<String> = pod
        .volumes()
        .iter()
        .filter(|v| {
            v.pointer("/persistentVolumeClaim/claimName")
                .and_then(Value::as_str)
                == Some(claim)
        })
        .filter_map(|v| v.get("name").and_then(Value::as_str).map(str::to_string))
        .collect();
    if volumes.is_empty() {
        return;
    }

    for container in pod.containers() {
        let Some(mounts) = container.get_mut("volumeMounts").and_then(Value::as_array_mut) else {
            continue;
        };
        for mount in mounts {
            let bound = mount
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| volumes.contains(name));
            if bound {
                as_object(mount).insert("readOnly".to_string(), Value::Bool(true));
            }
        }
    }
}
