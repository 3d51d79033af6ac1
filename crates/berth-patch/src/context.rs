//! Inputs to the patch engine
//!
//! [`PatchConfig`] is process-wide and comes from configuration.
//! [`PatchContext`] is built per deploy and passed by reference to every step.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::placeholder::Placeholders;

/// Tag assumed when an image reference has none
pub const DEFAULT_TAG: &str = "latest";

/// An image split into name and tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository, including any registry host and port
    pub name: String,
    /// Tag or digest
    pub tag: String,
}

impl ImageRef {
    /// Build from parts
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Split an image reference.
    ///
    /// A colon only starts the tag when it comes after the last `/`
    /// (otherwise it is a registry port). Digests (`@sha256:...`) are
    /// treated as the tag.
    pub fn parse(image: &str) -> Self {
        if let Some((name, digest)) = image.split_once('@') {
            return Self::new(name, digest);
        }
        let last_slash = image.rfind('/');
        match image.rfind(':') {
            Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                Self::new(&image[..colon], &image[colon + 1..])
            }
            _ => Self::new(image, DEFAULT_TAG),
        }
    }
}

/// A project's image allow-list and mirror set
#[derive(Debug, Clone, Default)]
pub struct ImageRules {
    allowed: HashSet<ImageRef>,
    mirrored: HashSet<ImageRef>,
}

impl ImageRules {
    /// Permit an image
    pub fn allow(&mut self, image: ImageRef) -> &mut Self {
        self.allowed.insert(image);
        self
    }

    /// Permit an image that is also mirrored in the private registry
    pub fn allow_mirrored(&mut self, image: ImageRef) -> &mut Self {
        self.mirrored.insert(image.clone());
        self.allowed.insert(image);
        self
    }

    /// Whether the image is on the allow-list
    pub fn is_allowed(&self, image: &ImageRef) -> bool {
        self.allowed.contains(image)
    }

    /// Whether the image has a private-registry copy
    pub fn is_mirrored(&self, image: &ImageRef) -> bool {
        self.mirrored.contains(image)
    }
}

/// The project limits the engine enforces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectLimits {
    /// Project id
    pub project_id: String,
    /// Maximum GPUs per container; requests are clamped to it
    pub gpu_quota: i64,
    /// Runtime deadline for batch workloads; 0 disables
    pub max_job_runtime_seconds: i64,
}

/// Per-deploy patch inputs
#[derive(Debug, Clone, Default)]
pub struct PatchContext {
    /// Job the documents are deployed for
    pub job_id: String,
    /// Manifest version the documents come from
    pub version_id: String,
    /// Project limits
    pub project: ProjectLimits,
    /// Administrators bypass the image allow-list
    pub actor_is_admin: bool,
    /// Whether mounts of the shared claim must be read-only
    pub enforce_read_only: bool,
    /// Claim name of the shared group volume
    pub shared_claim: Option<String>,
    /// Values for `{{key}}` tokens
    pub placeholders: Placeholders,
    /// Scheduler queue the job is submitted to
    pub queue_name: String,
    /// Project image rules
    pub images: ImageRules,
}

/// Settings for an alternate batch scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateScheduler {
    /// Value for `spec.schedulerName`
    pub scheduler_name: String,
    /// Pod annotation carrying the queue name
    pub queue_annotation_key: String,
    /// Pod annotation carrying the preemptible flag
    pub preemptible_annotation_key: String,
    /// Whether submitted pods may be preempted
    pub preemptible: bool,
}

/// Process-wide patch settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    /// Private registry prefix for mirrored images (e.g. "harbor.internal/mirror/")
    pub registry_prefix: Option<String>,
    /// Fixed pod `runAsUser`
    pub run_as_user: i64,
    /// Fixed pod `runAsGroup`, also used as `fsGroup`
    pub run_as_group: i64,
    /// Priority class stamped on every pod spec
    pub priority_class_name: Option<String>,
    /// Alternate scheduler; pods use the default scheduler when unset
    pub alternate_scheduler: Option<AlternateScheduler>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            registry_prefix: None,
            run_as_user: 1000,
            run_as_group: 1000,
            priority_class_name: None,
            alternate_scheduler: None,
        }
    }
}
