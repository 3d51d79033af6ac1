//! OpenTelemetry instruments for the deploy pipeline
//!
//! Instruments are created lazily against the global meter, so they are
//! no-ops until telemetry export is initialized.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("berth"));

/// Deploy attempts by outcome
///
/// Labels:
/// - `result`: submitted, rejected, invalid, failed
pub static DEPLOYS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("berth_deploys_total")
        .with_description("Total number of deploy attempts by outcome")
        .with_unit("{deploys}")
        .build()
});

/// Documents successfully applied to the cluster
///
/// Labels:
/// - `kind`: resource kind
pub static DOCUMENTS_APPLIED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("berth_documents_applied_total")
        .with_description("Total number of documents applied to the cluster")
        .with_unit("{documents}")
        .build()
});

/// Jobs cancelled
///
/// Labels:
/// - `reason`: user, schedule
pub static JOBS_CANCELLED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("berth_jobs_cancelled_total")
        .with_description("Total number of cancelled jobs by reason")
        .with_unit("{jobs}")
        .build()
});

/// Completed schedule reaper iterations
pub static REAPER_ITERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("berth_reaper_iterations_total")
        .with_description("Total number of schedule reaper iterations")
        .with_unit("{iterations}")
        .build()
});

/// Audit events dropped because the outbound queue was full
pub static AUDIT_EVENTS_DROPPED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("berth_audit_events_dropped_total")
        .with_description("Total number of audit events dropped on a full queue")
        .with_unit("{events}")
        .build()
});

/// Outcome label values for [`DEPLOYS_TOTAL`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Handed to the execution backend
    Submitted,
    /// Refused by quota or schedule admission
    Rejected,
    /// Failed validation or patching
    Invalid,
    /// Backend or storage failure
    Failed,
}

impl DeployOutcome {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Rejected => "rejected",
            Self::Invalid => "invalid",
            Self::Failed => "failed",
        }
    }
}

/// Record a deploy attempt
pub fn record_deploy(outcome: DeployOutcome) {
    DEPLOYS_TOTAL.add(1, &[KeyValue::new("result", outcome.as_str())]);
}

/// Record an applied document
pub fn record_document_applied(kind: &str) {
    DOCUMENTS_APPLIED.add(1, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record a cancellation
pub fn record_cancellation(reason: &'static str) {
    JOBS_CANCELLED.add(1, &[KeyValue::new("reason", reason)]);
}
