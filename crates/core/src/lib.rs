pub mod audit;
pub mod autonomy;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod sequences;
pub mod tracker;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use autonomy::{
    autonomy_score, autonomy_score_series, effective_tier, replay_tier, validate_policy_event,
    PolicyViolation, DEFAULT_CEILING, SCORE_SEED_TIER,
};
pub use catalog::SkillCatalog;
pub use domain::job::{
    validate_job_transition, InvalidJobTransition, Job, JobId, JobStatus, StepGate, StepResult,
    StepStatus,
};
pub use domain::policy::{
    ActionCeiling, PolicyEvent, PolicyEventId, PolicyEventType, PolicyTier, TierOverride,
};
pub use domain::sequence::{
    ExecutionMode, InputBinding, OnFailure, Sequence, SequenceKey, SequenceStep,
};
pub use domain::skill::{ActionType, RiskLevel, Skill, SkillCategory, SkillKey, UserId};
pub use errors::{ApplicationError, DomainError};
pub use sequences::{
    ExecutionContext, ExecutionGroup, ExecutionPlan, SequenceValidationError, UnresolvedInputError,
};
pub use tracker::{supersedes, MergeOutcome, SnapshotMerge};
