use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::sequence::SequenceKey;
use crate::domain::skill::{SkillKey, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Progress rank used by snapshot supersession: queued < running <
    /// terminal. All terminal states share the top rank, so no snapshot
    /// outranks a terminal one.
    pub fn progress_rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Policy gate outcome recorded on a step at dispatch time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepGate {
    /// Effective tier was `auto`; the skill ran unattended.
    Unattended,
    /// Effective tier was `suggest` or `approve`; the step was parked
    /// for human confirmation and the job completed around it.
    NeedsConfirmation,
    /// Effective tier was `disabled`; the step never ran.
    Disabled,
}

impl StepGate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unattended => "unattended",
            Self::NeedsConfirmation => "needs_confirmation",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unattended" => Some(Self::Unattended),
            "needs_confirmation" => Some(Self::NeedsConfirmation),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Outcome of one dispatched step. Results exist only for steps the
/// orchestrator actually reached; a step skipped by an early stop has no
/// result at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_order: u32,
    pub skill_key: SkillKey,
    pub output_key: String,
    pub status: StepStatus,
    pub gate: Option<StepGate>,
    /// Successful payload, also merged into the shared context under
    /// `output_key`.
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_class: Option<String>,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
}

impl StepResult {
    pub fn pending(step_order: u32, skill_key: SkillKey, output_key: impl Into<String>) -> Self {
        Self {
            step_order,
            skill_key,
            output_key: output_key.into(),
            status: StepStatus::Pending,
            gate: None,
            output: None,
            error: None,
            error_class: None,
            attempts: 0,
            duration_ms: None,
        }
    }
}

/// One sequence run for one user. Terminal jobs are immutable; every
/// persisted mutation bumps `revision` so stale snapshots can be told
/// apart from fresh ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub sequence_key: SequenceKey,
    pub user_id: UserId,
    pub status: JobStatus,
    pub step_results: Vec<StepResult>,
    /// Order of the step (or first step of the group) currently in
    /// flight. None before the first group and after the last.
    pub current_step: Option<u32>,
    /// First stopping error, set when the job fails.
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(sequence_key: SequenceKey, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            sequence_key,
            user_id,
            status: JobStatus::Queued,
            step_results: Vec::new(),
            current_step: None,
            error_message: None,
            cancel_requested: false,
            revision: 1,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    pub fn step_result(&self, step_order: u32) -> Option<&StepResult> {
        self.step_results.iter().find(|result| result.step_order == step_order)
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid job transition from {from:?} to {to:?}")]
pub struct InvalidJobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Legal lifecycle moves: queued -> running -> one terminal state.
/// Queued jobs may be cancelled before they start. Same-state moves are
/// tolerated so replayed transitions stay idempotent.
pub fn validate_job_transition(from: JobStatus, to: JobStatus) -> Result<(), InvalidJobTransition> {
    let valid = match (from, to) {
        (JobStatus::Queued, JobStatus::Running) => true,
        (JobStatus::Queued, JobStatus::Cancelled) => true,
        (JobStatus::Running, JobStatus::Completed) => true,
        (JobStatus::Running, JobStatus::Failed) => true,
        (JobStatus::Running, JobStatus::Cancelled) => true,
        (from, to) if from == to => true,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(InvalidJobTransition { from, to })
    }
}
