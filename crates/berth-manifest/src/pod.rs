//! Locating pod specs inside arbitrary workload documents
//!
//! Workloads nest their pod spec at different depths (`spec` for a Pod,
//! `spec.template.spec` for a Job or Deployment,
//! `spec.jobTemplate.spec.template.spec` for a CronJob, CRDs somewhere
//! similar). The locator walks only the `spec`, `template` and `jobTemplate`
//! keys and reports every map carrying `containers` as a pod spec.

use serde_json::{Map, Value};

const WALK_KEYS: &[&str] = &["spec", "template", "jobTemplate"];

/// Where a pod spec lives in a document, as JSON pointers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSpecLocation {
    /// Pointer to the pod spec map
    pub spec: String,
    /// Pointer to the metadata that belongs to the pod spec: the pod
    /// template's metadata, or the document's own for a bare Pod
    pub metadata: String,
}

/// Finds pod specs in a document
#[derive(Debug, Default, Clone, Copy)]
pub struct PodSpecLocator;

impl PodSpecLocator {
    /// All pod specs in `doc`, outermost first
    pub fn locate(doc: &Value) -> Vec<PodSpecLocation> {
        let mut found = Vec::new();
        if let Some(map) = doc.as_object() {
            walk(map, "", &mut found);
        }
        found
    }
}

fn walk(map: &Map<String, Value>, pointer: &str, found: &mut Vec<PodSpecLocation>) {
    for key in WALK_KEYS {
        let Some(child) = map.get(*key).and_then(Value::as_object) else {
            continue;
        };
        let child_pointer = format!("{pointer}/{key}");
        if *key == "spec" && child.contains_key("containers") {
            found.push(PodSpecLocation {
                spec: child_pointer,
                metadata: format!("{pointer}/metadata"),
            });
            continue;
        }
        walk(child, &child_pointer, found);
    }
}

/// Containers of a pod spec, init containers included
pub fn containers(pod_spec: &Value) -> impl Iterator<Item = &Value> {
    ["initContainers", "containers"]
        .into_iter()
        .filter_map(|key| pod_spec.get(key).and_then(Value::as_array))
        .flatten()
}

/// Mutable containers of a pod spec, init containers included
pub fn containers_mut(pod_spec: &mut Value) -> impl Iterator<Item = &mut Value> {
    let Some(map) = pod_spec.as_object_mut() else {
        return Vec::new().into_iter();
    };
    let mut out = Vec::new();
    for (key, value) in map.iter_mut() {
        if key == "containers" || key == "initContainers" {
            if let Some(list) = value.as_array_mut() {
                out.extend(list.iter_mut());
            }
        }
    }
    out.into_iter()
}

/// Claim names referenced by `persistentVolumeClaim` volumes of a pod spec
pub fn claim_names(pod_spec: &Value) -> impl Iterator<Item = &str> {
    pod_spec
        .get("volumes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| v.pointer("/persistentVolumeClaim/claimName").and_then(Value::as_str))
}

/// Container name for error messages
pub fn container_name(container: &Value) -> &str {
    container
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
}
