//! Shared plumbing for Berth: errors, YAML, naming, Kubernetes helpers, telemetry

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod metrics;
pub mod naming;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label carrying the job id on every object Berth applies
pub const JOB_ID_LABEL: &str = "berth.io/job-id";

/// Label carrying the manifest version id on every object Berth applies
pub const VERSION_ID_LABEL: &str = "berth.io/version-id";

/// Label marking namespaces and volumes managed by Berth
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "berth";

/// Label carrying the project id on tenant namespaces
pub const PROJECT_ID_LABEL: &str = "berth.io/project-id";

/// Extended resource name for NVIDIA GPUs
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";
