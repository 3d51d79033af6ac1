//! Outbound audit queue
//!
//! Audit persistence is external. Events are pushed into a bounded channel
//! without waiting; a single drain task hands them to the [`AuditWriter`].
//! When the channel is full the newest event is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use berth_common::metrics::AUDIT_EVENTS_DROPPED;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// Default queue capacity
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// One audited action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened, e.g. `job.submit`
    pub action: String,
    /// Acting user id
    pub user_id: String,
    /// Kind of record acted on
    pub resource_type: String,
    /// Id of the record acted on
    pub resource_id: String,
    /// Free-form detail
    pub details: Value,
    /// When it happened
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Event stamped with the current time and no details
    pub fn new(
        action: impl Into<String>,
        user_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            user_id: user_id.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            details: Value::Null,
            at: Utc::now(),
        }
    }

    /// Attach details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Audit persistence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuditWriter: Send + Sync {
    /// Persist one event
    async fn write(&self, event: &AuditEvent) -> berth_common::Result<()>;
}

/// Writes audit events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditWriter;

#[async_trait]
impl AuditWriter for LogAuditWriter {
    async fn write(&self, event: &AuditEvent) -> berth_common::Result<()> {
        info!(
            target: "berth::audit",
            action = %event.action,
            user_id = %event.user_id,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            details = %event.details,
            "audit"
        );
        Ok(())
    }
}

/// Producer side of the audit queue
#[derive(Debug, Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditQueue {
    /// Start the drain task and return the queue feeding it.
    ///
    /// The task ends once every queue handle is dropped.
    pub fn spawn(writer: Arc<dyn AuditWriter>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (queue, mut rx) = Self::channel(capacity);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = writer.write(&event).await {
                    warn!(action = %event.action, error = %e, "audit write failed");
                }
            }
            debug!("audit queue closed");
        });
        (queue, handle)
    }

    fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueue without waiting; returns whether the event was accepted
    pub fn record(&self, event: AuditEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                AUDIT_EVENTS_DROPPED.add(1, &[]);
                warn!(action = %event.action, "audit queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(action = %event.action, "audit queue closed, dropping event");
                false
            }
        }
    }

    /// Events dropped on a full queue since start
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
