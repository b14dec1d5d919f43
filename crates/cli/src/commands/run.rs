use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::info;

use crate::commands::CommandResult;
use cadence_agent::audit::TracingAuditSink;
use cadence_agent::orchestrator::{OrchestratorError, SequenceOrchestrator};
use cadence_agent::policy::PolicyService;
use cadence_agent::skills::HandlerSkillRuntime;
use cadence_agent::tracker::{JobEventBus, JobTracker, TracingNotificationSink};
use cadence_core::audit::AuditSink;
use cadence_core::catalog::SkillCatalog;
use cadence_core::config::{AppConfig, LoadOptions};
use cadence_core::domain::job::{Job, JobStatus, StepGate, StepResult, StepStatus};
use cadence_core::domain::sequence::SequenceKey;
use cadence_core::domain::skill::UserId;
use cadence_core::errors::ApplicationError;
use cadence_db::connect_with_settings;
use cadence_db::repositories::{
    JobRepository, SqlCeilingRepository, SqlJobRepository, SqlOverrideRepository,
    SqlPolicyEventRepository, SqlSequenceRepository,
};

/// A run that stops producing snapshots for this long is treated as
/// wedged rather than followed forever.
const SNAPSHOT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run(sequence: &str, user: &str, context: Option<&str>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let initial_context = match parse_initial_context(context) {
        Ok(map) => map,
        Err(message) => return CommandResult::failure("run", "validation", message, 7),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(execute(&config, sequence, user, initial_context));

    match result {
        Ok(job) => render_outcome(job),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("run", error_class, message, exit_code)
        }
    }
}

async fn execute(
    config: &AppConfig,
    sequence: &str,
    user: &str,
    initial_context: Map<String, Value>,
) -> Result<Job, (&'static str, String, u8)> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

    let jobs: Arc<dyn JobRepository> = Arc::new(SqlJobRepository::new(pool.clone()));
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let policy = Arc::new(PolicyService::new(
        Arc::new(SqlPolicyEventRepository::new(pool.clone())),
        Arc::new(SqlCeilingRepository::new(pool.clone())),
        Arc::new(SqlOverrideRepository::new(pool.clone())),
        Arc::clone(&audit),
        config.orchestrator.default_tier,
    ));
    let bus = JobEventBus::new(config.tracker.channel_capacity);
    let orchestrator = Arc::new(SequenceOrchestrator::new(
        Arc::new(SqlSequenceRepository::new(pool.clone())),
        Arc::clone(&jobs),
        policy,
        Arc::new(HandlerSkillRuntime::with_builtin_handlers()),
        SkillCatalog::builtin(),
        audit,
        bus.clone(),
    ));
    let tracker = Arc::new(JobTracker::new(
        Arc::clone(&jobs),
        bus,
        Arc::new(TracingNotificationSink),
        Duration::from_millis(config.tracker.poll_interval_ms),
    ));

    let sequence_key = SequenceKey(sequence.to_string());
    let user_id = UserId(user.to_string());

    let job_id = orchestrator
        .start(&sequence_key, &user_id, initial_context)
        .await
        .map_err(map_start_error)?;

    info!(
        event_name = "cli.job_accepted",
        job_id = %job_id,
        sequence_key = %sequence_key,
        user_id = %user_id,
    );

    let mut snapshots = tracker.subscribe(job_id.clone());
    let mut last_seen: Option<Job> = None;
    loop {
        match tokio::time::timeout(SNAPSHOT_IDLE_TIMEOUT, snapshots.recv()).await {
            Ok(Some(snapshot)) => {
                info!(
                    event_name = "cli.job_snapshot",
                    job_id = %snapshot.id,
                    status = snapshot.status.as_str(),
                    revision = snapshot.revision,
                    steps_recorded = snapshot.step_results.len(),
                );
                last_seen = Some(snapshot);
            }
            Ok(None) => break,
            Err(_) => {
                pool.close().await;
                return Err((
                    "tracker",
                    format!(
                        "job {job_id} produced no progress within {}s",
                        SNAPSHOT_IDLE_TIMEOUT.as_secs()
                    ),
                    9u8,
                ));
            }
        }
    }

    // The stream closes after a terminal snapshot; anything else means
    // the feed ended early, so the stored row is the source of truth.
    let terminal = match last_seen {
        Some(job) if job.status.is_terminal() => job,
        _ => {
            let stored = jobs
                .find_by_id(&job_id)
                .await
                .map_err(|error| ("persistence", error.to_string(), 4u8))?;
            match stored {
                Some(job) if job.status.is_terminal() => job,
                _ => {
                    pool.close().await;
                    return Err((
                        "tracker",
                        format!("job {job_id} stream closed before a terminal snapshot"),
                        9u8,
                    ));
                }
            }
        }
    };

    pool.close().await;
    Ok(terminal)
}

fn map_start_error(error: OrchestratorError) -> (&'static str, String, u8) {
    if matches!(error, OrchestratorError::SequenceNotFound(_)) {
        return ("not_found", error.to_string(), 8);
    }
    let application = ApplicationError::from(error);
    if application.is_caller_fault() {
        ("validation", application.to_string(), 7)
    } else {
        ("persistence", application.to_string(), 4)
    }
}

fn render_outcome(job: Job) -> CommandResult {
    let summary = render_job_summary(&job);
    match job.status {
        JobStatus::Completed => CommandResult::success("run", summary),
        JobStatus::Cancelled => CommandResult::failure("run", "job_cancelled", summary, 9),
        JobStatus::Failed => CommandResult::failure("run", "job_failed", summary, 9),
        JobStatus::Queued | JobStatus::Running => {
            CommandResult::failure("run", "tracker", summary, 9)
        }
    }
}

/// One header line plus one line per recorded step. Shared with the
/// `status` command so both render jobs identically.
pub(crate) fn render_job_summary(job: &Job) -> String {
    let mut lines = Vec::with_capacity(job.step_results.len() + 1);
    lines.push(header_line(job));
    for result in &job.step_results {
        lines.push(render_step_line(result));
    }
    lines.join("\n")
}

fn header_line(job: &Job) -> String {
    let base = format!("job {} {} for {}", job.id, job.status.as_str(), job.user_id);
    match (job.status, &job.error_message, job.current_step) {
        (JobStatus::Failed, Some(error), _) => format!("{base}: {error}"),
        (JobStatus::Queued | JobStatus::Running, _, Some(step)) => {
            format!("{base} (step {step} in flight)")
        }
        _ => format!("{base} (revision {})", job.revision),
    }
}

fn render_step_line(result: &StepResult) -> String {
    let base = format!(
        "  - step {} {}: {}",
        result.step_order,
        result.skill_key,
        result.status.as_str()
    );
    match (result.status, result.gate, &result.error) {
        (StepStatus::Skipped, Some(StepGate::NeedsConfirmation), _) => {
            format!("{base} (needs confirmation)")
        }
        (_, _, Some(error)) => format!("{base}: {error}"),
        _ => match result.duration_ms {
            Some(ms) => format!("{base} ({ms}ms)"),
            None => base,
        },
    }
}

fn parse_initial_context(raw: Option<&str>) -> Result<Map<String, Value>, String> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    let value: Value =
        serde_json::from_str(raw).map_err(|error| format!("--context is not valid JSON: {error}"))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!("--context must be a JSON object, got: {other}")),
    }
}
