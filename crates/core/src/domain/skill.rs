use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillKey(pub String);

impl fmt::Display for SkillKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of CRM effect a skill produces. Autonomy tiers and manager
/// ceilings are keyed by action type, not by individual skill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    EmailSend,
    CrmUpdate,
    CallSchedule,
    DataEnrich,
    NoteCreate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailSend => "email_send",
            Self::CrmUpdate => "crm_update",
            Self::CallSchedule => "call_schedule",
            Self::DataEnrich => "data_enrich",
            Self::NoteCreate => "note_create",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email_send" => Some(Self::EmailSend),
            "crm_update" => Some(Self::CrmUpdate),
            "call_schedule" => Some(Self::CallSchedule),
            "data_enrich" => Some(Self::DataEnrich),
            "note_create" => Some(Self::NoteCreate),
            _ => None,
        }
    }

    pub fn all() -> &'static [ActionType] {
        &[
            Self::EmailSend,
            Self::CrmUpdate,
            Self::CallSchedule,
            Self::DataEnrich,
            Self::NoteCreate,
        ]
    }

    /// Display-only risk badge. Never consulted by the policy engine.
    pub fn risk(&self) -> RiskLevel {
        match self {
            Self::EmailSend => RiskLevel::High,
            Self::CrmUpdate => RiskLevel::Medium,
            Self::CallSchedule => RiskLevel::Medium,
            Self::DataEnrich => RiskLevel::Low,
            Self::NoteCreate => RiskLevel::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Outreach,
    Research,
    Crm,
}

impl SkillCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outreach => "outreach",
            Self::Research => "research",
            Self::Crm => "crm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "outreach" => Some(Self::Outreach),
            "research" => Some(Self::Research),
            "crm" => Some(Self::Crm),
            _ => None,
        }
    }
}

/// Immutable skill metadata. The registry is read-only at runtime;
/// concrete skill behavior lives behind the runtime trait in the agent
/// crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub key: SkillKey,
    pub display_name: String,
    pub category: SkillCategory,
    pub action_type: ActionType,
    /// Context keys that must be resolvable before the skill is invoked.
    pub required_inputs: Vec<String>,
    /// Keys the skill promises to include in its output payload.
    pub declared_outputs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::{ActionType, RiskLevel, SkillCategory};

    #[test]
    fn action_type_round_trips_from_storage_encoding() {
        for action in ActionType::all() {
            let decoded = ActionType::parse(action.as_str());
            assert_eq!(decoded, Some(*action));
        }
    }

    #[test]
    fn skill_category_round_trips_from_storage_encoding() {
        let cases = [SkillCategory::Outreach, SkillCategory::Research, SkillCategory::Crm];

        for category in cases {
            let decoded = SkillCategory::parse(category.as_str());
            assert_eq!(decoded, Some(category));
        }
    }

    #[test]
    fn risk_badge_is_display_metadata_only() {
        assert_eq!(ActionType::EmailSend.risk(), RiskLevel::High);
        assert_eq!(ActionType::DataEnrich.risk(), RiskLevel::Low);
        assert_eq!(RiskLevel::Medium.as_str(), "medium");
    }
}
