//! `{{key}}` substitution
//!
//! Substitution is textual and runs over the JSON serialization of a
//! document, so values are JSON-escaped before insertion. Only plain
//! identifiers are placeholders: Argo expressions such as
//! `{{inputs.parameters.x}}` or `{{workflow.name}}` are left for the workflow
//! engine, as is its loop variable `{{item}}`.

use std::collections::BTreeMap;

use crate::error::PatchError;

/// Identifiers owned by the workflow engine
const PASSTHROUGH_KEYS: &[&str] = &["item"];

/// Values available to `{{key}}` tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders(BTreeMap<String, String>);

impl Placeholders {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Replace every placeholder token in `text`
    pub fn substitute(&self, text: &str) -> Result<String, PatchError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                break;
            };
            let key = after_open[..end].trim();
            out.push_str(&rest[..start]);

            if !is_identifier(key) || PASSTHROUGH_KEYS.contains(&key) {
                out.push_str(&rest[start..start + 2 + end + 2]);
            } else {
                let value = self
                    .get(key)
                    .ok_or_else(|| PatchError::UnresolvedPlaceholder {
                        token: key.to_string(),
                    })?;
                out.push_str(&json_escape(value));
            }
            rest = &after_open[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Placeholders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
