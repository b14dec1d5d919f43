//! Tracing-backed audit sink.
//!
//! Tests observe audit trails through `InMemoryAuditSink`; production wiring
//! installs this sink so job and policy audit events land in the same
//! structured stream as the runtime logs.

use cadence_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Forwards every audit event to the `tracing` pipeline.
///
/// Rejected and failed outcomes surface at `warn` so operators spot them
/// without lowering the log filter.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                category = ?event.category,
                actor = %event.actor,
                correlation_id = %event.correlation_id,
                job_id = event.job_id.as_ref().map(|id| id.0.as_str()),
                user_id = event.user_id.as_ref().map(|id| id.0.as_str()),
                %metadata,
                "audit"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                category = ?event.category,
                outcome = ?event.outcome,
                actor = %event.actor,
                correlation_id = %event.correlation_id,
                job_id = event.job_id.as_ref().map(|id| id.0.as_str()),
                user_id = event.user_id.as_ref().map(|id| id.0.as_str()),
                %metadata,
                "audit"
            ),
        }
    }
}
