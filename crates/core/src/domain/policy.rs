use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::skill::{ActionType, UserId};

/// Trust ladder for an action type. Derived `Ord` follows declaration
/// order: disabled < suggest < approve < auto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTier {
    Disabled,
    Suggest,
    Approve,
    Auto,
}

impl PolicyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Suggest => "suggest",
            Self::Approve => "approve",
            Self::Auto => "auto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "suggest" => Some(Self::Suggest),
            "approve" => Some(Self::Approve),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Whether a skill at this tier may run without a human in the loop.
    pub fn runs_unattended(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyEventId(pub String);

impl PolicyEventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for PolicyEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEventType {
    PromotionAccepted,
    PromotionRejected,
    DemotionAuto,
    DemotionEmergency,
}

impl PolicyEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromotionAccepted => "promotion_accepted",
            Self::PromotionRejected => "promotion_rejected",
            Self::DemotionAuto => "demotion_auto",
            Self::DemotionEmergency => "demotion_emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "promotion_accepted" => Some(Self::PromotionAccepted),
            "promotion_rejected" => Some(Self::PromotionRejected),
            "demotion_auto" => Some(Self::DemotionAuto),
            "demotion_emergency" => Some(Self::DemotionEmergency),
            _ => None,
        }
    }

    /// Rejected promotions record a refusal; the tier stays where it was.
    pub fn changes_tier(&self) -> bool {
        !matches!(self, Self::PromotionRejected)
    }
}

/// Append-only trust-change record. The event log is the source of truth
/// for tier history and the autonomy score; rows are never updated or
/// deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvent {
    pub id: PolicyEventId,
    pub user_id: UserId,
    pub action_type: ActionType,
    pub event_type: PolicyEventType,
    pub from_tier: PolicyTier,
    pub to_tier: PolicyTier,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Manager-controlled cap for one action type. Effective tiers can never
/// exceed `max_ceiling`, no matter what overrides or promotions say.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCeiling {
    pub action_type: ActionType,
    pub max_ceiling: PolicyTier,
    pub auto_promotion_eligible: bool,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-user tier preference for one action type, clamped by the ceiling
/// at resolution time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierOverride {
    pub user_id: UserId,
    pub action_type: ActionType,
    pub tier: PolicyTier,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{PolicyEventType, PolicyTier};

    #[test]
    fn tier_ordering_matches_trust_ladder() {
        assert!(PolicyTier::Disabled < PolicyTier::Suggest);
        assert!(PolicyTier::Suggest < PolicyTier::Approve);
        assert!(PolicyTier::Approve < PolicyTier::Auto);
        assert_eq!(PolicyTier::Auto.min(PolicyTier::Approve), PolicyTier::Approve);
    }

    #[test]
    fn tier_round_trips_from_storage_encoding() {
        let cases =
            [PolicyTier::Disabled, PolicyTier::Suggest, PolicyTier::Approve, PolicyTier::Auto];

        for tier in cases {
            let decoded = PolicyTier::parse(tier.as_str());
            assert_eq!(decoded, Some(tier));
        }
    }

    #[test]
    fn event_type_round_trips_from_storage_encoding() {
        let cases = [
            PolicyEventType::PromotionAccepted,
            PolicyEventType::PromotionRejected,
            PolicyEventType::DemotionAuto,
            PolicyEventType::DemotionEmergency,
        ];

        for event_type in cases {
            let decoded = PolicyEventType::parse(event_type.as_str());
            assert_eq!(decoded, Some(event_type));
        }
    }

    #[test]
    fn only_auto_runs_unattended_and_rejections_keep_tier() {
        assert!(PolicyTier::Auto.runs_unattended());
        assert!(!PolicyTier::Approve.runs_unattended());
        assert!(!PolicyEventType::PromotionRejected.changes_tier());
        assert!(PolicyEventType::DemotionEmergency.changes_tier());
    }
}
