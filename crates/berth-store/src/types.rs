//! Persisted records

use std::fmt;
use std::str::FromStr;

use berth_manifest::{Classified, DocumentKind, ParsedDocument, SubmissionMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random id
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// The id as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a manifest version
    VersionId
);
string_id!(
    /// Identifier of a project
    ProjectId
);
string_id!(
    /// Identifier of a submitted job
    JobId
);

/// An immutable manifest version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Version id
    pub id: VersionId,
    /// Owning project
    pub project_id: ProjectId,
    /// Who submitted it
    pub author: String,
    /// Commit-style message
    pub message: String,
    /// Raw manifest text
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A version without its content, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    /// Version id
    pub id: VersionId,
    /// Owning project
    pub project_id: ProjectId,
    /// Who submitted it
    pub author: String,
    /// Commit-style message
    pub message: String,
    /// Number of documents in the version
    pub document_count: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Input for a new version
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Owning project
    pub project_id: ProjectId,
    /// Who submits it
    pub author: String,
    /// Commit-style message
    pub message: String,
    /// Raw manifest text
    pub content: String,
}

/// One resource of a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Owning version
    pub version_id: VersionId,
    /// Position within the manifest, starting at 0
    pub position: usize,
    /// Resource kind
    pub kind: DocumentKind,
    /// `metadata.name` as written (may contain placeholders)
    pub name: String,
    /// Structured content
    pub content: serde_json::Value,
}

impl Classified for Document {
    fn document_kind(&self) -> DocumentKind {
        self.kind
    }
}

/// Input for a new document
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Resource kind
    pub kind: DocumentKind,
    /// `metadata.name`
    pub name: String,
    /// Structured content
    pub content: serde_json::Value,
}

impl From<ParsedDocument> for NewDocument {
    fn from(doc: ParsedDocument) -> Self {
        Self {
            kind: doc.kind,
            name: doc.name,
            content: doc.content,
        }
    }
}

/// A weekly window during which a project may run jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    /// Day of week, 0 = Sunday
    pub weekday: u8,
    /// "HH:MM"
    pub start: String,
    /// "HH:MM"; at or before `start` means the window runs past midnight
    pub end: String,
}

/// A tenant project and its limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project id
    pub id: ProjectId,
    /// Display name
    pub name: String,
    /// Owning group
    pub group_id: String,
    /// Maximum GPUs per container
    pub gpu_quota: i64,
    /// Running jobs allowed per user; 0 = unlimited
    pub max_concurrent_jobs_per_user: i64,
    /// Queued jobs allowed per user; 0 = unlimited
    pub max_queued_jobs_per_user: i64,
    /// Batch runtime deadline; 0 = none
    pub max_job_runtime_seconds: i64,
    /// Allowed windows; empty = always
    #[serde(default)]
    pub schedule_windows: Vec<ScheduleWindow>,
}

/// Job lifecycle state
///
/// `submitted -> queued -> running -> {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not yet seen by a scheduler
    Submitted,
    /// Waiting for resources
    Queued,
    /// Executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped by a user or the schedule reaper
    Cancelled,
}

impl JobStatus {
    /// States that count against the queued cap
    pub const PENDING: &'static [JobStatus] = &[JobStatus::Submitted, JobStatus::Queued];

    /// States that are still live
    pub const ACTIVE: &'static [JobStatus] =
        &[JobStatus::Submitted, JobStatus::Queued, JobStatus::Running];

    /// Whether no further transition is allowed
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Storage form
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// A submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job id
    pub id: JobId,
    /// Deployed version
    pub version_id: VersionId,
    /// Owning project
    pub project_id: ProjectId,
    /// Tenant namespace the job runs in
    pub namespace: String,
    /// Submitting user
    pub user_id: String,
    /// Current state
    pub status: JobStatus,
    /// Job or workflow submission
    pub submission_mode: SubmissionMode,
    /// Scheduler queue
    pub queue_name: String,
    /// Scheduling priority
    pub priority: i32,
    /// When the job was accepted
    pub submitted_at: DateTime<Utc>,
    /// When it started running
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail
    pub error_message: Option<String>,
}

/// Pagination for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum results
    pub limit: u32,
    /// Results to skip
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}
