use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::skill::SkillKey;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceKey(pub String);

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How one input key of a step gets its value at dispatch time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputBinding {
    /// Fixed value baked into the sequence definition.
    Literal { value: Value },
    /// Value produced by an earlier step, addressed by that step's
    /// `output_key`, or supplied in the run's initial context.
    Reference { key: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Stop,
    Continue,
    Retry,
}

impl OnFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Continue => "continue",
            Self::Retry => "retry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stop" => Some(Self::Stop),
            "continue" => Some(Self::Continue),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    /// 1-based position inside the sequence.
    pub step_order: u32,
    pub skill_key: SkillKey,
    /// Input key of the skill -> binding producing its value.
    pub input_bindings: Vec<(String, InputBinding)>,
    /// Key under which this step's output lands in the shared context.
    /// Unique within the sequence.
    pub output_key: String,
    pub on_failure: OnFailure,
    pub execution_mode: ExecutionMode,
    /// Adjacent steps sharing the same group id run concurrently.
    /// Only meaningful when `execution_mode` is `Parallel`.
    pub parallel_group: Option<u32>,
}

impl SequenceStep {
    pub fn binding_for(&self, input_key: &str) -> Option<&InputBinding> {
        self.input_bindings
            .iter()
            .find(|(key, _)| key == input_key)
            .map(|(_, binding)| binding)
    }
}

/// A named, ordered chain of skill invocations. Read-only to the
/// orchestrator; edits happen through the definition store before a run
/// begins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub key: SequenceKey,
    pub display_name: String,
    pub steps: Vec<SequenceStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sequence {
    pub fn new(key: SequenceKey, display_name: impl Into<String>, steps: Vec<SequenceStep>) -> Self {
        let now = Utc::now();
        Self { key, display_name: display_name.into(), steps, created_at: now, updated_at: now }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}
