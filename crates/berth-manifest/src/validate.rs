//! Per-document validation: identity, schema and resource sanity

use berth_common::naming::is_dns1123_subdomain;
use k8s_openapi::api::{apps::v1 as apps, batch::v1 as batch, core::v1 as core};
use k8s_openapi::api::networking::v1 as networking;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::kind::DocumentKind;
use crate::pod::{container_name, containers, PodSpecLocator};
use crate::quantity::{display_quantity, quantity_from_value};

const PLACEHOLDER_OPEN: &str = "{{";

/// Check apiVersion, kind and metadata.name; returns the classified kind and the name
pub fn validate_identity(doc: &Value) -> Result<(DocumentKind, String), String> {
    let kind_str = doc
        .get("kind")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or("missing required field 'kind'")?;
    let api_version = doc
        .get("apiVersion")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or("missing required field 'apiVersion'")?;
    let name = doc
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or("missing required field 'metadata.name'")?;

    let kind: DocumentKind = kind_str.parse()?;

    let (group, _version) = berth_common::kube_utils::parse_api_version(api_version);
    if group != kind.api_group() {
        return Err(format!(
            "apiVersion '{api_version}' does not match kind {kind} (expected group '{}')",
            kind.api_group()
        ));
    }

    // Placeholder names are checked after substitution, by the API server
    if !name.contains(PLACEHOLDER_OPEN) && !is_dns1123_subdomain(name) {
        return Err(format!(
            "metadata.name '{name}' must be a lowercase DNS-1123 subdomain"
        ));
    }

    Ok((kind, name.to_string()))
}

/// Deserialize built-in kinds into their typed Kubernetes object
pub fn validate_schema(kind: DocumentKind, doc: &Value) -> Result<(), String> {
    let result = match kind {
        DocumentKind::Pod => typed::<core::Pod>(doc),
        DocumentKind::Service => typed::<core::Service>(doc),
        DocumentKind::ConfigMap => typed::<core::ConfigMap>(doc),
        DocumentKind::Secret => typed::<core::Secret>(doc),
        DocumentKind::PersistentVolumeClaim => typed::<core::PersistentVolumeClaim>(doc),
        DocumentKind::ServiceAccount => typed::<core::ServiceAccount>(doc),
        DocumentKind::Deployment => typed::<apps::Deployment>(doc),
        DocumentKind::StatefulSet => typed::<apps::StatefulSet>(doc),
        DocumentKind::DaemonSet => typed::<apps::DaemonSet>(doc),
        DocumentKind::ReplicaSet => typed::<apps::ReplicaSet>(doc),
        DocumentKind::Job => typed::<batch::Job>(doc),
        DocumentKind::CronJob => typed::<batch::CronJob>(doc),
        DocumentKind::Ingress => typed::<networking::Ingress>(doc),
        DocumentKind::NetworkPolicy => typed::<networking::NetworkPolicy>(doc),
        // CRDs: structure is checked by their own admission on apply
        DocumentKind::FlashJob
        | DocumentKind::Workflow
        | DocumentKind::WorkflowTemplate
        | DocumentKind::CronWorkflow => Ok(()),
    };
    result.map_err(|e| format!("invalid {kind}: {e}"))
}

fn typed<T: DeserializeOwned>(doc: &Value) -> Result<(), serde_json::Error> {
    T::deserialize(doc).map(|_| ())
}

/// Every container's cpu and memory limit must be at least its request
pub fn validate_resource_limits(doc: &Value) -> Result<(), String> {
    for location in PodSpecLocator::locate(doc) {
        let Some(spec) = doc.pointer(&location.spec) else {
            continue;
        };
        for container in containers(spec) {
            for resource in ["cpu", "memory"] {
                check_limit(container, resource)?;
            }
        }
    }
    Ok(())
}

fn check_limit(container: &Value, resource: &str) -> Result<(), String> {
    let request = container.pointer(&format!("/resources/requests/{resource}"));
    let limit = container.pointer(&format!("/resources/limits/{resource}"));
    let name = container_name(container);

    let parse = |v: &Value| {
        quantity_from_value(v).map_err(|e| format!("container '{name}': {resource}: {e}"))
    };

    match (request, limit) {
        (Some(request), Some(limit)) => {
            if parse(limit)? < parse(request)? {
                return Err(format!(
                    "container '{name}': {resource} limit ({}) cannot be less than request ({})",
                    display_quantity(limit),
                    display_quantity(request)
                ));
            }
        }
        (Some(only), None) | (None, Some(only)) => {
            parse(only)?;
        }
        (None, None) => {}
    }
    Ok(())
}

/// Turn numeric resource quantities into strings, the form the typed
/// Kubernetes schema (and the API server's canonical output) uses
pub fn normalize_quantities(doc: &mut Value) {
    for location in PodSpecLocator::locate(doc) {
        let Some(spec) = doc.pointer_mut(&location.spec) else {
            continue;
        };
        for container in crate::pod::containers_mut(spec) {
            for section in ["requests", "limits"] {
                let Some(map) = container
                    .pointer_mut(&format!("/resources/{section}"))
                    .and_then(Value::as_object_mut)
                else {
                    continue;
                };
                for value in map.values_mut() {
                    if let Value::Number(n) = value {
                        *value = Value::String(n.to_string());
                    }
                }
            }
        }
    }
}
