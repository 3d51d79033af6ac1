//! Deploy orchestration for Berth
//!
//! [`DeployService`] runs the deploy pipeline: version storage, schedule and
//! quota admission, volume binding, patching and submission. The
//! [`ScheduleReaper`] cancels jobs whose project schedule has closed, and the
//! [`AuditQueue`] forwards audit events without blocking requests.

#![deny(missing_docs)]

pub mod admission;
pub mod audit;
pub mod binder;
pub mod directory;
pub mod error;
pub mod reaper;
pub mod schedule;
pub mod service;

#[cfg(test)]
mod testing;

use serde::{Deserialize, Serialize};

pub use audit::{AuditEvent, AuditQueue, AuditWriter, LogAuditWriter, DEFAULT_AUDIT_CAPACITY};
pub use binder::{BinderConfig, GroupRole, StoragePermission, TenancyDirectory, VolumeBinding};
pub use directory::StaticDirectory;
pub use error::{DeployError, DeployResult, ErrorCategory};
pub use reaper::{ScheduleReaper, DEFAULT_REAPER_INTERVAL};
pub use schedule::{is_allowed, ScheduleError};
pub use service::{DeployConfig, DeployRequest, DeployService, ImageCatalog, Stores, DEFAULT_QUEUE};

/// The authenticated caller of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user id
    pub user_id: String,
    /// Login name as entered; may hold characters invalid in labels
    pub username: String,
    /// Platform administrator
    #[serde(default)]
    pub is_admin: bool,
}
