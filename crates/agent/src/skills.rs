use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use cadence_core::domain::skill::SkillKey;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("no handler registered for skill `{0}`")]
    HandlerMissing(String),
    #[error("skill `{skill_key}` failed: {message}")]
    Invocation { skill_key: String, message: String },
}

impl SkillError {
    pub fn invocation(skill_key: &SkillKey, message: impl Into<String>) -> Self {
        Self::Invocation { skill_key: skill_key.0.clone(), message: message.into() }
    }
}

/// One concrete skill implementation. Handlers receive the resolved
/// input object and return an opaque output value; they never see the
/// job or the execution context.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    fn skill_key(&self) -> &'static str;
    async fn invoke(&self, input: Value) -> Result<Value, SkillError>;
}

/// Boundary the orchestrator invokes skills through. Opaque on purpose:
/// the orchestrator only sees success-with-output or failure-with-error.
#[async_trait]
pub trait SkillRuntime: Send + Sync {
    async fn invoke(&self, skill_key: &SkillKey, input: Value) -> Result<Value, SkillError>;
}

/// Routes invocations to registered handlers by skill key.
#[derive(Default)]
pub struct HandlerSkillRuntime {
    handlers: HashMap<String, Box<dyn SkillHandler>>,
}

impl HandlerSkillRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic handlers for every skill in the builtin catalog.
    /// They fabricate plausible CRM payloads so demo runs work without
    /// any external service.
    pub fn with_builtin_handlers() -> Self {
        let mut runtime = Self::new();
        runtime.register(EnrichLeadHandler);
        runtime.register(ScoreLeadHandler);
        runtime.register(DraftFollowupEmailHandler);
        runtime.register(ScheduleCallHandler);
        runtime.register(UpdateCrmStageHandler);
        runtime.register(LogActivityNoteHandler);
        runtime
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: SkillHandler + 'static,
    {
        self.handlers.insert(handler.skill_key().to_string(), Box::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl SkillRuntime for HandlerSkillRuntime {
    async fn invoke(&self, skill_key: &SkillKey, input: Value) -> Result<Value, SkillError> {
        let handler = self
            .handlers
            .get(&skill_key.0)
            .ok_or_else(|| SkillError::HandlerMissing(skill_key.0.clone()))?;
        handler.invoke(input).await
    }
}

fn input_str(input: &Value, key: &str) -> String {
    match input.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}

struct EnrichLeadHandler;

#[async_trait]
impl SkillHandler for EnrichLeadHandler {
    fn skill_key(&self) -> &'static str {
        "enrich_lead"
    }

    async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        let lead_id = input_str(&input, "lead_id");
        Ok(json!({
            "lead_id": lead_id,
            "company": format!("{lead_id} Holdings"),
            "title": "VP of Operations",
        }))
    }
}

struct ScoreLeadHandler;

#[async_trait]
impl SkillHandler for ScoreLeadHandler {
    fn skill_key(&self) -> &'static str {
        "score_lead"
    }

    async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        // Stable pseudo-score keyed off the profile text length so repeat
        // runs over the same lead produce the same number.
        let profile = input.get("profile").cloned().unwrap_or(Value::Null);
        let score = (profile.to_string().len() % 60) + 40;
        Ok(json!({ "score": score }))
    }
}

struct DraftFollowupEmailHandler;

#[async_trait]
impl SkillHandler for DraftFollowupEmailHandler {
    fn skill_key(&self) -> &'static str {
        "draft_followup_email"
    }

    async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        let lead_id = input_str(&input, "lead_id");
        let company = input
            .get("profile")
            .and_then(|profile| profile.get("company"))
            .and_then(Value::as_str)
            .unwrap_or("your team");
        Ok(json!({
            "subject": format!("Following up with {company}"),
            "body": format!("Hi, circling back on our conversation about {lead_id}."),
        }))
    }
}

struct ScheduleCallHandler;

#[async_trait]
impl SkillHandler for ScheduleCallHandler {
    fn skill_key(&self) -> &'static str {
        "schedule_call"
    }

    async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        let lead_id = input_str(&input, "lead_id");
        Ok(json!({ "slot": "2025-12-01T15:30:00Z", "lead_id": lead_id }))
    }
}

struct UpdateCrmStageHandler;

#[async_trait]
impl SkillHandler for UpdateCrmStageHandler {
    fn skill_key(&self) -> &'static str {
        "update_crm_stage"
    }

    async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        let lead_id = input_str(&input, "lead_id");
        let stage = input_str(&input, "stage");
        Ok(json!({ "crm_record": { "lead_id": lead_id, "stage": stage } }))
    }
}

struct LogActivityNoteHandler;

#[async_trait]
impl SkillHandler for LogActivityNoteHandler {
    fn skill_key(&self) -> &'static str {
        "log_activity_note"
    }

    async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        let lead_id = input_str(&input, "lead_id");
        let note = input_str(&input, "note");
        Ok(json!({ "note_id": format!("note-{lead_id}-{}", note.len()) }))
    }
}
