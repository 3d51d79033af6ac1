//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use berth_deploy::{BinderConfig, DeployConfig, DEFAULT_AUDIT_CAPACITY, DEFAULT_QUEUE};
use berth_patch::{AlternateScheduler, PatchConfig};
use chrono::FixedOffset;
use clap::Parser;

/// Berth deploy control plane
#[derive(Parser, Debug, Clone)]
#[command(name = "berth", version, about, long_about = None)]
pub struct ServerConfig {
    /// Address the API listens on
    #[arg(long, env = "BERTH_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// PostgreSQL URL; an in-memory store is used when unset
    #[arg(long, env = "BERTH_DATABASE_URL")]
    pub database_url: Option<String>,

    /// YAML file with projects, groups and image allow-lists
    #[arg(long, env = "BERTH_TENANCY_FILE")]
    pub tenancy_file: Option<PathBuf>,

    /// Private registry prefix for mirrored images
    #[arg(long, env = "BERTH_REGISTRY_PREFIX")]
    pub registry_prefix: Option<String>,

    /// Pod runAsUser
    #[arg(long, env = "BERTH_RUN_AS_USER", default_value_t = 1000)]
    pub run_as_user: i64,

    /// Pod runAsGroup and fsGroup
    #[arg(long, env = "BERTH_RUN_AS_GROUP", default_value_t = 1000)]
    pub run_as_group: i64,

    /// Priority class stamped on every pod
    #[arg(long, env = "BERTH_PRIORITY_CLASS")]
    pub priority_class: Option<String>,

    /// Alternate batch scheduler name; the default scheduler is used when unset
    #[arg(long, env = "BERTH_SCHEDULER_NAME")]
    pub scheduler_name: Option<String>,

    /// Pod annotation carrying the queue name for the alternate scheduler
    #[arg(
        long,
        env = "BERTH_QUEUE_ANNOTATION_KEY",
        default_value = "scheduling.flash-sched.io/queue-name"
    )]
    pub queue_annotation_key: String,

    /// Pod annotation carrying the preemptible flag for the alternate scheduler
    #[arg(
        long,
        env = "BERTH_PREEMPTIBLE_ANNOTATION_KEY",
        default_value = "scheduling.flash-sched.io/preemptable"
    )]
    pub preemptible_annotation_key: String,

    /// Mark submitted pods preemptible
    #[arg(long, env = "BERTH_PREEMPTIBLE")]
    pub preemptible: bool,

    /// Queue for deploys that name none
    #[arg(long, env = "BERTH_DEFAULT_QUEUE", default_value = DEFAULT_QUEUE)]
    pub default_queue: String,

    /// Priority for deploys that name none
    #[arg(long, env = "BERTH_DEFAULT_PRIORITY", default_value_t = 0)]
    pub default_priority: i32,

    /// Seconds between schedule reaper sweeps
    #[arg(long, env = "BERTH_REAPER_INTERVAL_SECS", default_value_t = 60)]
    pub reaper_interval_secs: u64,

    /// Audit queue capacity
    #[arg(long, env = "BERTH_AUDIT_CAPACITY", default_value_t = DEFAULT_AUDIT_CAPACITY)]
    pub audit_capacity: usize,

    /// UTC offset, in minutes, that schedule windows are written in
    #[arg(
        long,
        env = "BERTH_SCHEDULE_UTC_OFFSET_MINUTES",
        default_value_t = 0,
        allow_hyphen_values = true
    )]
    pub schedule_utc_offset_minutes: i32,
}

impl ServerConfig {
    /// Patch engine settings
    pub fn patch_config(&self) -> PatchConfig {
        PatchConfig {
            registry_prefix: self.registry_prefix.clone().filter(|p| !p.is_empty()),
            run_as_user: self.run_as_user,
            run_as_group: self.run_as_group,
            priority_class_name: self.priority_class.clone().filter(|p| !p.is_empty()),
            alternate_scheduler: self
                .scheduler_name
                .clone()
                .filter(|s| !s.is_empty())
                .map(|scheduler_name| AlternateScheduler {
                    scheduler_name,
                    queue_annotation_key: self.queue_annotation_key.clone(),
                    preemptible_annotation_key: self.preemptible_annotation_key.clone(),
                    preemptible: self.preemptible,
                }),
        }
    }

    /// Schedule window offset
    pub fn schedule_offset(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.schedule_utc_offset_minutes * 60).ok_or_else(|| {
            anyhow::anyhow!(
                "schedule UTC offset {} minutes is out of range",
                self.schedule_utc_offset_minutes
            )
        })
    }

    /// Time between reaper sweeps
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    /// Deploy service settings
    pub fn deploy_config(&self) -> anyhow::Result<DeployConfig> {
        Ok(DeployConfig {
            patch: self.patch_config(),
            binder: BinderConfig::default(),
            default_queue: self.default_queue.clone(),
            default_priority: self.default_priority,
            schedule_offset: self.schedule_offset()?,
        })
    }
}
