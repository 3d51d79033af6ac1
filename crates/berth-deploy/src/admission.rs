//! Per-user job caps

use berth_store::{JobStatus, JobStore, Project};
use tracing::debug;

use crate::error::{DeployError, DeployResult};

/// Refuse a new job when the user already sits at a project cap.
///
/// Running jobs count against `max_concurrent_jobs_per_user`; submitted and
/// queued jobs against `max_queued_jobs_per_user`. A cap of 0 is unlimited.
pub async fn admit(jobs: &dyn JobStore, project: &Project, user_id: &str) -> DeployResult<()> {
    if project.max_concurrent_jobs_per_user > 0 {
        let running = jobs
            .count_for_user(&project.id, user_id, &[JobStatus::Running])
            .await?;
        if cap_reached(running, project.max_concurrent_jobs_per_user) {
            debug!(project_id = %project.id, user_id, running, "concurrent cap reached");
            return Err(DeployError::QuotaExceeded(
                "max concurrent jobs exceeded".to_string(),
            ));
        }
    }

    if project.max_queued_jobs_per_user > 0 {
        let queued = jobs
            .count_for_user(&project.id, user_id, JobStatus::PENDING)
            .await?;
        if cap_reached(queued, project.max_queued_jobs_per_user) {
            debug!(project_id = %project.id, user_id, queued, "queued cap reached");
            return Err(DeployError::QuotaExceeded("max queued jobs exceeded".to_string()));
        }
    }

    Ok(())
}

fn cap_reached(count: u64, cap: i64) -> bool {
    u64::try_from(cap).is_ok_and(|cap| count >= cap)
}
