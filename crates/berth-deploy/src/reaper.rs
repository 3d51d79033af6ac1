//! Background cancellation of jobs outside their project's schedule

use std::sync::Arc;
use std::time::Duration;

use berth_common::metrics::{record_cancellation, REAPER_ITERATIONS};
use berth_executor::ExecutionBackend;
use berth_store::{JobStatus, JobStore, ProjectStore};
use chrono::{DateTime, FixedOffset, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::schedule::is_allowed;

/// Default time between sweeps
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Cancels live jobs of projects whose schedule window has closed
pub struct ScheduleReaper {
    projects: Arc<dyn ProjectStore>,
    jobs: Arc<dyn JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    offset: FixedOffset,
}

impl ScheduleReaper {
    /// Create a reaper evaluating schedules at `offset`
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        jobs: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            projects,
            jobs,
            backend,
            offset,
        }
    }

    /// One sweep; returns how many jobs were cancelled
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let projects = match self.projects.list().await {
            Ok(projects) => projects,
            Err(e) => {
                warn!(error = %e, "failed to list projects for schedule enforcement");
                return 0;
            }
        };

        let local = now.with_timezone(&self.offset);
        let mut cancelled = 0;
        for project in projects {
            match is_allowed(&project.schedule_windows, &local) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(project_id = %project.id, error = %e, "invalid project schedule");
                    continue;
                }
            }

            let jobs = match self.jobs.list_for_project(&project.id, JobStatus::ACTIVE).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(project_id = %project.id, error = %e, "failed to list jobs for schedule enforcement");
                    continue;
                }
            };

            for job in jobs {
                match self.backend.cancel(&job.id).await {
                    Ok(()) => {
                        record_cancellation("schedule");
                        info!(job_id = %job.id, project_id = %project.id, "cancelled job outside schedule");
                        cancelled += 1;
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, project_id = %project.id, error = %e, "failed to cancel job outside schedule");
                    }
                }
            }
        }
        cancelled
    }

    /// Sweep every `interval` until `token` is cancelled.
    ///
    /// A sweep always finishes before the next starts; ticks missed while a
    /// sweep runs are delayed rather than bunched.
    pub async fn run(self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "schedule reaper started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("schedule reaper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let cancelled = self.run_once(Utc::now()).await;
                    REAPER_ITERATIONS.add(1, &[]);
                    debug!(cancelled, "schedule sweep finished");
                }
            }
        }
    }
}
