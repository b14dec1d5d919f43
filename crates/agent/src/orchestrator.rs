use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use cadence_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use cadence_core::catalog::SkillCatalog;
use cadence_core::domain::job::{
    validate_job_transition, InvalidJobTransition, Job, JobId, JobStatus, StepGate, StepResult,
    StepStatus,
};
use cadence_core::domain::policy::PolicyTier;
use cadence_core::domain::sequence::{OnFailure, SequenceKey, SequenceStep};
use cadence_core::domain::skill::UserId;
use cadence_core::errors::{ApplicationError, DomainError};
use cadence_core::sequences::{ExecutionContext, ExecutionPlan, SequenceValidationError};
use cadence_db::repositories::{JobRepository, RepositoryError, SequenceRepository};

use crate::policy::{PolicyService, PolicyServiceError};
use crate::skills::SkillRuntime;
use crate::tracker::JobEventBus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("sequence `{0}` was not found")]
    SequenceNotFound(SequenceKey),
    #[error("job `{0}` was not found")]
    JobNotFound(JobId),
    #[error(transparent)]
    Validation(#[from] SequenceValidationError),
    #[error(transparent)]
    Policy(#[from] PolicyServiceError),
    #[error("job storage error: {0}")]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transition(#[from] InvalidJobTransition),
}

impl From<OrchestratorError> for ApplicationError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::SequenceNotFound(key) => DomainError::SequenceNotFound(key).into(),
            OrchestratorError::JobNotFound(id) => {
                DomainError::InvariantViolation(format!("job `{id}` was not found")).into()
            }
            OrchestratorError::Validation(error) => DomainError::from(error).into(),
            OrchestratorError::Policy(error) => error.into(),
            OrchestratorError::Repository(error) => {
                ApplicationError::Persistence(error.to_string())
            }
            OrchestratorError::Transition(error) => DomainError::from(error).into(),
        }
    }
}

/// What a finished step means for the rest of the run.
enum Disposition {
    /// Keep going; later groups still dispatch.
    Proceed,
    /// A `stop` failure; the job fails once the current group drains.
    Stop(String),
    /// The step needs human confirmation; the job completes around it
    /// and later groups never dispatch.
    Park,
}

struct StepOutcome {
    result: StepResult,
    disposition: Disposition,
}

/// Drives sequence runs end to end: validates the definition, persists
/// a job snapshot after every group, consults the policy engine per
/// step, and dispatches parallel groups against a context frozen at
/// group start.
///
/// The orchestrator is the only writer of job rows while a run is in
/// flight; [`SequenceOrchestrator::request_cancel`] touches only the
/// `cancel_requested` flag, which the run re-reads between groups.
pub struct SequenceOrchestrator {
    sequences: Arc<dyn SequenceRepository>,
    jobs: Arc<dyn JobRepository>,
    policy: Arc<PolicyService>,
    runtime: Arc<dyn SkillRuntime>,
    catalog: SkillCatalog,
    audit: Arc<dyn AuditSink>,
    bus: JobEventBus,
}

impl SequenceOrchestrator {
    pub fn new(
        sequences: Arc<dyn SequenceRepository>,
        jobs: Arc<dyn JobRepository>,
        policy: Arc<PolicyService>,
        runtime: Arc<dyn SkillRuntime>,
        catalog: SkillCatalog,
        audit: Arc<dyn AuditSink>,
        bus: JobEventBus,
    ) -> Self {
        Self { sequences, jobs, policy, runtime, catalog, audit, bus }
    }

    /// Accepts a run and drives it on a background task. Returns the
    /// job id once the queued snapshot is durable, so callers can
    /// subscribe to progress immediately.
    pub async fn start(
        self: &Arc<Self>,
        sequence_key: &SequenceKey,
        user_id: &UserId,
        initial_context: Map<String, Value>,
    ) -> Result<JobId, OrchestratorError> {
        let (job, plan) = self.prepare(sequence_key, user_id, &initial_context).await?;
        let job_id = job.id.clone();

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let failed_job_id = job.id.clone();
            if let Err(error) = orchestrator.drive(job, plan, initial_context).await {
                warn!(
                    event_name = "orchestrator.run_aborted",
                    job_id = %failed_job_id,
                    error = %error,
                    "run aborted before reaching a terminal status"
                );
                orchestrator.mark_failed_after_abort(&failed_job_id, &error).await;
            }
        });

        Ok(job_id)
    }

    /// Runs a sequence on the caller's task and returns the terminal
    /// job snapshot.
    pub async fn run_to_completion(
        &self,
        sequence_key: &SequenceKey,
        user_id: &UserId,
        initial_context: Map<String, Value>,
    ) -> Result<Job, OrchestratorError> {
        let (job, plan) = self.prepare(sequence_key, user_id, &initial_context).await?;
        self.drive(job, plan, initial_context).await
    }

    /// Flags a job for cancellation. Work already dispatched drains
    /// normally; groups that have not started will never dispatch.
    /// Terminal jobs are left untouched.
    pub async fn request_cancel(&self, job_id: &JobId) -> Result<Job, OrchestratorError> {
        let stored = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.clone()))?;

        if stored.status.is_terminal() || stored.cancel_requested {
            return Ok(stored);
        }

        // Flag-only store mutation; the driver owns every other field
        // of an in-flight row.
        let flagged = self
            .jobs
            .mark_cancel_requested(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.clone()))?;
        self.bus.publish(&flagged);

        info!(
            event_name = "orchestrator.cancel_requested",
            job_id = %flagged.id,
            status = flagged.status.as_str(),
            "cancellation flagged; in-flight work will drain first"
        );
        self.audit.emit(AuditEvent::new(
            Some(flagged.id.clone()),
            Some(flagged.user_id.clone()),
            flagged.id.0.clone(),
            "job.cancel_requested",
            AuditCategory::Job,
            "orchestrator",
            AuditOutcome::Success,
        ));

        Ok(flagged)
    }

    /// Validates the sequence against the catalog and the initial
    /// context, then persists the queued job. Nothing is written when
    /// validation fails.
    async fn prepare(
        &self,
        sequence_key: &SequenceKey,
        user_id: &UserId,
        initial_context: &Map<String, Value>,
    ) -> Result<(Job, ExecutionPlan), OrchestratorError> {
        let sequence = self
            .sequences
            .find_by_key(sequence_key)
            .await?
            .ok_or_else(|| OrchestratorError::SequenceNotFound(sequence_key.clone()))?;
        let plan = ExecutionPlan::build(&sequence, &self.catalog, initial_context)?;

        let job = Job::new(sequence_key.clone(), user_id.clone());
        self.jobs.save(job.clone()).await?;
        self.bus.publish(&job);

        info!(
            event_name = "orchestrator.job_queued",
            job_id = %job.id,
            sequence_key = %sequence_key,
            user_id = %user_id,
            steps = plan.step_count(),
            groups = plan.groups.len(),
            "run accepted"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(job.id.clone()),
                Some(user_id.clone()),
                job.id.0.clone(),
                "job.queued",
                AuditCategory::Job,
                "orchestrator",
                AuditOutcome::Success,
            )
            .with_metadata("sequence_key", sequence_key.0.clone()),
        );

        Ok((job, plan))
    }

    async fn drive(
        &self,
        mut job: Job,
        plan: ExecutionPlan,
        initial_context: Map<String, Value>,
    ) -> Result<Job, OrchestratorError> {
        self.apply_transition(&mut job, JobStatus::Running)?;
        job.started_at = Some(Utc::now());
        self.persist(&mut job).await?;

        let mut context = ExecutionContext::from_initial(initial_context);

        for group in &plan.groups {
            if self.cancellation_pending(&job).await? {
                self.finish(&mut job, JobStatus::Cancelled).await?;
                return Ok(job);
            }

            job.current_step = group.first_step_order();
            self.persist(&mut job).await?;

            // Siblings read the same frozen view; outputs land in the
            // shared context only after the whole group drains.
            let frozen = context.clone();
            let dispatched =
                join_all(group.steps.iter().map(|step| self.drive_step(&job, step, &frozen)))
                    .await;

            let mut stop_message: Option<String> = None;
            let mut parked = false;
            for outcome in dispatched {
                let outcome = outcome?;
                if outcome.result.status == StepStatus::Completed {
                    if let Some(output) = &outcome.result.output {
                        context.insert_output(&outcome.result.output_key, output.clone());
                    }
                }
                match outcome.disposition {
                    Disposition::Proceed => {}
                    Disposition::Stop(message) => {
                        if stop_message.is_none() {
                            stop_message = Some(message);
                        }
                    }
                    Disposition::Park => parked = true,
                }
                job.step_results.push(outcome.result);
            }
            self.persist(&mut job).await?;

            // A stop failure outranks a parked sibling in the same group.
            if let Some(message) = stop_message {
                job.error_message = Some(message);
                self.finish(&mut job, JobStatus::Failed).await?;
                return Ok(job);
            }
            if parked {
                self.finish(&mut job, JobStatus::Completed).await?;
                return Ok(job);
            }
        }

        self.finish(&mut job, JobStatus::Completed).await?;
        Ok(job)
    }

    /// Dispatches one step: inputs first, then the policy gate, then
    /// the skill itself with at most one retry.
    async fn drive_step(
        &self,
        job: &Job,
        step: &SequenceStep,
        frozen: &ExecutionContext,
    ) -> Result<StepOutcome, OrchestratorError> {
        let mut result =
            StepResult::pending(step.step_order, step.skill_key.clone(), step.output_key.clone());

        let inputs = match frozen.resolve_inputs(step) {
            Ok(inputs) => inputs,
            Err(error) => {
                result.status = StepStatus::Failed;
                result.error = Some(error.to_string());
                result.error_class = Some("unresolved_input".to_string());
                self.audit_step(job, &result, "job.step_failed", AuditOutcome::Failed);
                return Ok(StepOutcome {
                    disposition: failure_disposition(step.on_failure, &result),
                    result,
                });
            }
        };

        let Some(action_type) = self.catalog.action_type_of(&step.skill_key) else {
            result.status = StepStatus::Failed;
            result.error = Some(format!("skill `{}` is not in the catalog", step.skill_key.0));
            result.error_class = Some("unknown_skill".to_string());
            self.audit_step(job, &result, "job.step_failed", AuditOutcome::Failed);
            return Ok(StepOutcome {
                disposition: failure_disposition(step.on_failure, &result),
                result,
            });
        };

        // Fresh read per dispatch; tiers changed mid-run apply to every
        // step not yet dispatched.
        let tier = self.policy.resolve_tier(&job.user_id, action_type).await?;
        match tier {
            PolicyTier::Disabled => {
                result.status = StepStatus::Skipped;
                result.gate = Some(StepGate::Disabled);
                result.error = Some(format!(
                    "action type `{}` is disabled for user `{}`",
                    action_type.as_str(),
                    job.user_id
                ));
                result.error_class = Some("policy".to_string());
                self.audit_step(job, &result, "job.step_skipped", AuditOutcome::Rejected);
                return Ok(StepOutcome {
                    disposition: failure_disposition(step.on_failure, &result),
                    result,
                });
            }
            PolicyTier::Suggest | PolicyTier::Approve => {
                result.status = StepStatus::Skipped;
                result.gate = Some(StepGate::NeedsConfirmation);
                info!(
                    event_name = "orchestrator.step_parked",
                    job_id = %job.id,
                    step_order = step.step_order,
                    skill_key = %step.skill_key.0,
                    tier = tier.as_str(),
                    "step needs human confirmation; run completes around it"
                );
                self.audit_step(job, &result, "job.step_parked", AuditOutcome::Success);
                return Ok(StepOutcome { disposition: Disposition::Park, result });
            }
            PolicyTier::Auto => {}
        }

        result.gate = Some(StepGate::Unattended);
        let max_attempts = if step.on_failure == OnFailure::Retry { 2 } else { 1 };

        for attempt in 1..=max_attempts {
            result.attempts = attempt;
            let started = Instant::now();
            match self.runtime.invoke(&step.skill_key, inputs.clone()).await {
                Ok(output) => {
                    result.duration_ms = Some(started.elapsed().as_millis() as u64);
                    result.status = StepStatus::Completed;
                    result.output = Some(output);
                    result.error = None;
                    result.error_class = None;
                    self.audit_step(job, &result, "job.step_completed", AuditOutcome::Success);
                    return Ok(StepOutcome { disposition: Disposition::Proceed, result });
                }
                Err(error) => {
                    result.duration_ms = Some(started.elapsed().as_millis() as u64);
                    result.error = Some(error.to_string());
                    result.error_class = Some("skill_invocation".to_string());
                    warn!(
                        event_name = "orchestrator.step_attempt_failed",
                        job_id = %job.id,
                        step_order = step.step_order,
                        skill_key = %step.skill_key.0,
                        attempt,
                        error = %error,
                        "skill invocation failed"
                    );
                }
            }
        }

        result.status = StepStatus::Failed;
        self.audit_step(job, &result, "job.step_failed", AuditOutcome::Failed);
        Ok(StepOutcome { disposition: failure_disposition(step.on_failure, &result), result })
    }

    async fn cancellation_pending(&self, job: &Job) -> Result<bool, OrchestratorError> {
        if job.cancel_requested {
            return Ok(true);
        }
        let stored = self.jobs.find_by_id(&job.id).await?;
        Ok(stored.is_some_and(|row| row.cancel_requested))
    }

    /// Writes the in-flight snapshot back, folding in any cancel flag a
    /// concurrent [`request_cancel`] put on the stored row.
    ///
    /// [`request_cancel`]: SequenceOrchestrator::request_cancel
    async fn persist(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        if let Some(stored) = self.jobs.find_by_id(&job.id).await? {
            job.cancel_requested = job.cancel_requested || stored.cancel_requested;
            job.revision = job.revision.max(stored.revision);
        }
        job.revision += 1;
        job.updated_at = Utc::now();
        self.jobs.save(job.clone()).await?;
        self.bus.publish(job);
        Ok(())
    }

    async fn finish(&self, job: &mut Job, status: JobStatus) -> Result<(), OrchestratorError> {
        self.apply_transition(job, status)?;
        job.current_step = None;
        job.finished_at = Some(Utc::now());
        self.persist(job).await?;

        info!(
            event_name = "orchestrator.job_finished",
            job_id = %job.id,
            status = status.as_str(),
            steps_recorded = job.step_results.len(),
            "run reached a terminal status"
        );
        let outcome = match status {
            JobStatus::Failed => AuditOutcome::Failed,
            _ => AuditOutcome::Success,
        };
        self.audit.emit(
            AuditEvent::new(
                Some(job.id.clone()),
                Some(job.user_id.clone()),
                job.id.0.clone(),
                format!("job.{}", status.as_str()),
                AuditCategory::Job,
                "orchestrator",
                outcome,
            )
            .with_metadata("steps_recorded", job.step_results.len().to_string()),
        );
        Ok(())
    }

    fn apply_transition(&self, job: &mut Job, to: JobStatus) -> Result<(), OrchestratorError> {
        validate_job_transition(job.status, to)?;
        job.status = to;
        Ok(())
    }

    fn audit_step(&self, job: &Job, result: &StepResult, event_type: &str, outcome: AuditOutcome) {
        self.audit.emit(
            AuditEvent::new(
                Some(job.id.clone()),
                Some(job.user_id.clone()),
                job.id.0.clone(),
                event_type,
                AuditCategory::Job,
                "orchestrator",
                outcome,
            )
            .with_metadata("step_order", result.step_order.to_string())
            .with_metadata("skill_key", result.skill_key.0.clone()),
        );
    }

    /// Best effort after an aborted background run: flip the stored row
    /// to failed when the lifecycle allows it, so subscribers are not
    /// left waiting on a job that will never progress.
    async fn mark_failed_after_abort(&self, job_id: &JobId, error: &OrchestratorError) {
        let Ok(Some(mut stored)) = self.jobs.find_by_id(job_id).await else {
            return;
        };
        if stored.status.is_terminal()
            || validate_job_transition(stored.status, JobStatus::Failed).is_err()
        {
            return;
        }

        stored.status = JobStatus::Failed;
        stored.error_message = Some(error.to_string());
        stored.finished_at = Some(Utc::now());
        stored.revision += 1;
        stored.updated_at = Utc::now();
        if self.jobs.save(stored.clone()).await.is_ok() {
            self.bus.publish(&stored);
        }
    }
}

/// Maps a failed or policy-skipped step onto the run-level outcome.
/// Retry only re-invokes the skill; failures the runtime never saw fall
/// through to continue.
fn failure_disposition(on_failure: OnFailure, result: &StepResult) -> Disposition {
    match on_failure {
        OnFailure::Stop => Disposition::Stop(stop_message(result)),
        OnFailure::Continue | OnFailure::Retry => Disposition::Proceed,
    }
}

fn stop_message(result: &StepResult) -> String {
    match &result.error {
        Some(error) => format!("step {}: {}", result.step_order, error),
        None => format!("step {} failed", result.step_order),
    }
}
