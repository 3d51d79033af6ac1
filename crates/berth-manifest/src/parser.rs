//! Multi-document manifest parsing

use berth_common::yaml::parse_yaml_documents;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ManifestError;
use crate::kind::DocumentKind;
use crate::validate::{
    normalize_quantities, validate_identity, validate_resource_limits, validate_schema,
};

/// A validated document from a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Position in the manifest, starting at 0
    pub position: usize,
    /// Classified kind
    pub kind: DocumentKind,
    /// `metadata.name`
    pub name: String,
    /// Structured content, kind normalized to canonical casing
    pub content: Value,
}

/// Parse and validate a multi-document manifest.
///
/// Fails as a whole if any single document is invalid; the error names the
/// offending document by its 1-based index.
pub fn parse_manifest(raw: &str) -> Result<Vec<ParsedDocument>, ManifestError> {
    let values = parse_yaml_documents(raw)?;
    if values.is_empty() {
        return Err(ManifestError::Empty);
    }

    let docs = values
        .into_iter()
        .enumerate()
        .map(|(position, value)| {
            parse_document(position, value).map_err(|m| ManifestError::document(position + 1, m))
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(documents = docs.len(), "parsed manifest");
    Ok(docs)
}

fn parse_document(position: usize, mut content: Value) -> Result<ParsedDocument, String> {
    if !content.is_object() {
        return Err("document must be a mapping".to_string());
    }

    validate_resource_limits(&content)?;
    let (kind, name) = validate_identity(&content)?;

    content["kind"] = Value::String(kind.as_str().to_string());
    normalize_quantities(&mut content);
    validate_schema(kind, &content)?;

    Ok(ParsedDocument {
        position,
        kind,
        name,
        content,
    })
}
