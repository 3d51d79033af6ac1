//! Patch errors

use thiserror::Error;

/// Errors that abort patching of a document
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    /// A `{{key}}` token had no value
    #[error("unresolved placeholder '{{{{{token}}}}}'")]
    UnresolvedPlaceholder {
        /// The key inside the braces
        token: String,
    },

    /// A container image is not on the project's allow-list
    #[error("image '{name}:{tag}' is not allowed for this project")]
    ImageNotAllowed {
        /// Image name without tag
        name: String,
        /// Image tag
        tag: String,
    },

    /// GPUs were requested but the project cannot have any
    #[error("project GPU configuration invalid: quota is {quota}, must be greater than 0")]
    InvalidGpuQuota {
        /// The project's configured quota
        quota: i64,
    },

    /// A GPU request is not a whole number of devices
    #[error("container '{container}': GPU quantity '{value}' must be a whole number")]
    InvalidGpuQuantity {
        /// Container name
        container: String,
        /// The offending value
        value: String,
    },

    /// Re-reading the substituted document failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PatchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
