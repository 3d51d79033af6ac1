//! Document kinds and workload classification

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every resource kind a manifest may contain
///
/// Kind names are matched case-insensitively and stored in their canonical
/// Kubernetes casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// core/v1 Pod
    Pod,
    /// core/v1 Service
    Service,
    /// core/v1 ConfigMap
    ConfigMap,
    /// core/v1 Secret
    Secret,
    /// core/v1 PersistentVolumeClaim
    PersistentVolumeClaim,
    /// core/v1 ServiceAccount
    ServiceAccount,
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// apps/v1 ReplicaSet
    ReplicaSet,
    /// batch/v1 Job
    Job,
    /// batch/v1 CronJob
    CronJob,
    /// networking.k8s.io/v1 Ingress
    Ingress,
    /// networking.k8s.io/v1 NetworkPolicy
    NetworkPolicy,
    /// Batch job handled by the priority scheduler
    FlashJob,
    /// Argo Workflow
    Workflow,
    /// Argo WorkflowTemplate
    WorkflowTemplate,
    /// Argo CronWorkflow
    CronWorkflow,
}

/// How a kind participates in submission-mode filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadClass {
    /// Batch job kinds: Job, CronJob, FlashJob
    Ordinary,
    /// Workflow engine kinds: Workflow, WorkflowTemplate, CronWorkflow
    Workflow,
    /// Supporting resources that ride along with either mode
    Other,
}

const ALL_KINDS: &[DocumentKind] = &[
    DocumentKind::Pod,
    DocumentKind::Service,
    DocumentKind::ConfigMap,
    DocumentKind::Secret,
    DocumentKind::PersistentVolumeClaim,
    DocumentKind::ServiceAccount,
    DocumentKind::Deployment,
    DocumentKind::StatefulSet,
    DocumentKind::DaemonSet,
    DocumentKind::ReplicaSet,
    DocumentKind::Job,
    DocumentKind::CronJob,
    DocumentKind::Ingress,
    DocumentKind::NetworkPolicy,
    DocumentKind::FlashJob,
    DocumentKind::Workflow,
    DocumentKind::WorkflowTemplate,
    DocumentKind::CronWorkflow,
];

impl DocumentKind {
    /// Canonical kind string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::ServiceAccount => "ServiceAccount",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::Ingress => "Ingress",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::FlashJob => "FlashJob",
            Self::Workflow => "Workflow",
            Self::WorkflowTemplate => "WorkflowTemplate",
            Self::CronWorkflow => "CronWorkflow",
        }
    }

    /// API group the kind must be declared in ("" for core)
    pub fn api_group(&self) -> &'static str {
        match self {
            Self::Pod
            | Self::Service
            | Self::ConfigMap
            | Self::Secret
            | Self::PersistentVolumeClaim
            | Self::ServiceAccount => "",
            Self::Deployment | Self::StatefulSet | Self::DaemonSet | Self::ReplicaSet => "apps",
            Self::Job | Self::CronJob => "batch",
            Self::Ingress | Self::NetworkPolicy => "networking.k8s.io",
            Self::FlashJob => "scheduling.flash-sched.io",
            Self::Workflow | Self::WorkflowTemplate | Self::CronWorkflow => "argoproj.io",
        }
    }

    /// Filtering class of the kind
    pub fn workload_class(&self) -> WorkloadClass {
        match self {
            Self::Job | Self::CronJob | Self::FlashJob => WorkloadClass::Ordinary,
            Self::Workflow | Self::WorkflowTemplate | Self::CronWorkflow => WorkloadClass::Workflow,
            Self::Pod
            | Self::Service
            | Self::ConfigMap
            | Self::Secret
            | Self::PersistentVolumeClaim
            | Self::ServiceAccount
            | Self::Deployment
            | Self::StatefulSet
            | Self::DaemonSet
            | Self::ReplicaSet
            | Self::Ingress
            | Self::NetworkPolicy => WorkloadClass::Other,
        }
    }

    /// Whether the kind is a built-in Kubernetes type with a typed schema
    pub fn is_builtin(&self) -> bool {
        !matches!(
            self,
            Self::FlashJob | Self::Workflow | Self::WorkflowTemplate | Self::CronWorkflow
        )
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KINDS
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported resource kind '{s}'"))
    }
}

impl Serialize for DocumentKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocumentKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which class of workload a deploy submits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    /// Ordinary batch jobs
    Job,
    /// Workflow engine submissions
    Workflow,
}

impl SubmissionMode {
    /// Lowercase wire/storage form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Workflow => "workflow",
        }
    }

    /// The workload class this mode deploys
    pub fn workload_class(&self) -> WorkloadClass {
        match self {
            Self::Job => WorkloadClass::Ordinary,
            Self::Workflow => WorkloadClass::Workflow,
        }
    }
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "job" => Ok(Self::Job),
            "workflow" => Ok(Self::Workflow),
            other => Err(format!("invalid submission mode '{other}'")),
        }
    }
}
