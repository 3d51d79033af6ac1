//! GPU quota clamp

use berth_common::GPU_RESOURCE;
use berth_manifest::pod::container_name;
use serde_json::Value;
use tracing::debug;

use crate::error::PatchError;
use crate::view::{as_object, child, PodSpecMut};

/// Clamp every container's GPU count to the project quota.
///
/// The count is taken from `requests`, or from `limits` when only a limit is
/// set. Request and limit are both rewritten to the clamped value.
pub fn apply(pod: &mut PodSpecMut<'_>, quota: i64) -> Result<(), PatchError> {
    for container in pod.containers() {
        let Some(requested) = requested_gpus(container)? else {
            continue;
        };
        if quota <= 0 {
            return Err(PatchError::InvalidGpuQuota { quota });
        }

        let granted = requested.min(quota);
        if granted < requested {
            debug!(
                container = %container_name(container),
                requested,
                granted,
                "clamping GPU request to project quota"
            );
        }

        let value = Value::String(granted.to_string());
        let resources = child(as_object(container), "resources");
        child(resources, "requests").insert(GPU_RESOURCE.to_string(), value.clone());
        child(resources, "limits").insert(GPU_RESOURCE.to_string(), value);
    }
    Ok(())
}

fn requested_gpus(container: &Value) -> Result<Option<i64>, PatchError> {
    let resources = container.get("resources");
    let raw = resources
        .and_then(|r| r.get("requests"))
        .and_then(|r| r.get(GPU_RESOURCE))
        .or_else(|| {
            resources
                .and_then(|r| r.get("limits"))
                .and_then(|l| l.get(GPU_RESOURCE))
        });
    let Some(raw) = raw else {
        return Ok(None);
    };

    let parsed = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n >= 0 => Ok(Some(n)),
        _ => Err(PatchError::InvalidGpuQuantity {
            container: container_name(container).to_string(),
            value: match raw {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }),
    }
}
