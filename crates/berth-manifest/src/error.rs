//! Manifest errors

use thiserror::Error;

use crate::kind::SubmissionMode;

/// Errors produced while parsing, validating or filtering manifests
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// The text is not valid YAML
    #[error("invalid YAML: {0}")]
    Yaml(String),

    /// The manifest contains no documents
    #[error("no valid YAML documents found")]
    Empty,

    /// A single document failed validation (index is 1-based)
    #[error("document {index}: {message}")]
    Document {
        /// Position of the document in the manifest, starting at 1
        index: usize,
        /// What is wrong with it
        message: String,
    },

    /// Mode filtering left no workload to submit
    #[error("no {mode} workload resources found")]
    NoWorkloads {
        /// The requested submission mode
        mode: SubmissionMode,
    },
}

impl ManifestError {
    pub(crate) fn document(index: usize, message: impl Into<String>) -> Self {
        Self::Document {
            index,
            message: message.into(),
        }
    }
}

impl From<berth_common::yaml::YamlError> for ManifestError {
    fn from(e: berth_common::yaml::YamlError) -> Self {
        Self::Yaml(e.to_string())
    }
}
