//! Shared Kubernetes helpers using kube-rs

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, GroupVersionKind, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

/// Field manager used for every server-side apply issued by Berth
pub const FIELD_MANAGER: &str = "berth";

/// Split an apiVersion into (group, version)
///
/// ```
/// use berth_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("batch/v1"), ("batch".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build a GroupVersionKind from an apiVersion string and kind
pub fn gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = parse_api_version(api_version);
    GroupVersionKind {
        group,
        version,
        kind: kind.to_string(),
    }
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// The version is used exactly as given; prefer discovery when the server's
/// storage version matters.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Irregular plurals for kinds Berth handles
const KIND_PLURALS: &[(&str, &str)] = &[
    ("networkpolicy", "networkpolicies"),
    ("ingress", "ingresses"),
    ("cronworkflow", "cronworkflows"),
    ("workflowtemplate", "workflowtemplates"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple English
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Whether a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Ensure a namespace exists with the given labels (idempotent).
///
/// Uses server-side apply so it never fails on "already exists" and doesn't
/// race with concurrent creators.
pub async fn ensure_namespace_with_labels(
    client: &Client,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<(), kube::Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "labels": labels
        }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
        .await?;
    debug!(namespace = %name, "ensured namespace");
    Ok(())
}
