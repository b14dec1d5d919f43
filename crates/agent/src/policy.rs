use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use cadence_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use cadence_core::autonomy::{
    autonomy_score, autonomy_score_series, effective_tier, replay_tier, validate_policy_event,
    PolicyViolation, DEFAULT_CEILING,
};
use cadence_core::domain::policy::{
    ActionCeiling, PolicyEvent, PolicyEventId, PolicyEventType, PolicyTier, TierOverride,
};
use cadence_core::domain::skill::{ActionType, UserId};
use cadence_core::errors::{ApplicationError, DomainError};
use cadence_db::repositories::{
    CeilingRepository, OverrideRepository, PolicyEventRepository, RepositoryError,
};

#[derive(Debug, Error)]
pub enum PolicyServiceError {
    #[error(transparent)]
    Violation(#[from] PolicyViolation),
    #[error("policy storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<PolicyServiceError> for ApplicationError {
    fn from(error: PolicyServiceError) -> Self {
        match error {
            PolicyServiceError::Violation(violation) => DomainError::from(violation).into(),
            PolicyServiceError::Repository(error) => {
                ApplicationError::Persistence(error.to_string())
            }
        }
    }
}

/// Tier resolution and the append-only trust ledger.
///
/// Ceilings and overrides are read from the store on every call. Tier
/// resolution is a trust boundary: a ceiling lowered by a manager must
/// clamp the very next resolution, so nothing here is cached.
pub struct PolicyService {
    events: Arc<dyn PolicyEventRepository>,
    ceilings: Arc<dyn CeilingRepository>,
    overrides: Arc<dyn OverrideRepository>,
    audit: Arc<dyn AuditSink>,
    default_tier: PolicyTier,
}

impl PolicyService {
    pub fn new(
        events: Arc<dyn PolicyEventRepository>,
        ceilings: Arc<dyn CeilingRepository>,
        overrides: Arc<dyn OverrideRepository>,
        audit: Arc<dyn AuditSink>,
        default_tier: PolicyTier,
    ) -> Self {
        Self { events, ceilings, overrides, audit, default_tier }
    }

    /// Effective tier for one user and action type: the stored override
    /// (or the org default) clamped to a fresh ceiling read.
    pub async fn resolve_tier(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<PolicyTier, PolicyServiceError> {
        let user_override = self.overrides.get(user_id, action_type).await?;
        let ceiling = self.ceilings.get(action_type).await?;

        Ok(effective_tier(
            self.default_tier,
            user_override.map(|stored| stored.tier),
            ceiling.map(|row| row.max_ceiling),
        ))
    }

    /// Unclamped tier according to the event log: the last tier-changing
    /// event's target, or the org default when the log is empty.
    pub async fn stored_tier(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<PolicyTier, PolicyServiceError> {
        let history = self.events.list_for_action(user_id, action_type).await?;
        Ok(replay_tier(self.default_tier, &history))
    }

    /// Validates and appends one trust-change event, then materializes
    /// the resulting tier as the user's override row. A failed
    /// validation writes nothing at all.
    pub async fn record_event(
        &self,
        user_id: &UserId,
        action_type: ActionType,
        event_type: PolicyEventType,
        from_tier: PolicyTier,
        to_tier: PolicyTier,
        reason: Option<String>,
    ) -> Result<PolicyEvent, PolicyServiceError> {
        let current = self.stored_tier(user_id, action_type).await?;
        let ceiling_row = self.ceilings.get(action_type).await?;
        let ceiling = ceiling_row.as_ref().map(|row| row.max_ceiling).unwrap_or(DEFAULT_CEILING);
        let eligible = ceiling_row.map(|row| row.auto_promotion_eligible).unwrap_or(false);

        if let Err(violation) = validate_policy_event(
            current,
            ceiling,
            eligible,
            action_type,
            event_type,
            from_tier,
            to_tier,
        ) {
            self.audit.emit(
                AuditEvent::new(
                    None,
                    Some(user_id.clone()),
                    "policy",
                    format!("policy.{}", event_type.as_str()),
                    AuditCategory::Policy,
                    "policy_engine",
                    AuditOutcome::Rejected,
                )
                .with_metadata("action_type", action_type.as_str())
                .with_metadata("violation", violation.to_string()),
            );
            return Err(violation.into());
        }

        let event = PolicyEvent {
            id: PolicyEventId::generate(),
            user_id: user_id.clone(),
            action_type,
            event_type,
            from_tier,
            to_tier,
            reason,
            created_at: Utc::now(),
        };
        self.events.append(event.clone()).await?;

        if event_type.changes_tier() {
            self.overrides
                .set(TierOverride {
                    user_id: user_id.clone(),
                    action_type,
                    tier: to_tier,
                    updated_at: event.created_at,
                })
                .await?;
        }

        info!(
            event_name = "policy.event_recorded",
            user_id = %user_id,
            action_type = action_type.as_str(),
            policy_event_type = event_type.as_str(),
            from_tier = from_tier.as_str(),
            to_tier = to_tier.as_str(),
            "policy event appended"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                Some(user_id.clone()),
                event.id.0.clone(),
                format!("policy.{}", event_type.as_str()),
                AuditCategory::Policy,
                "policy_engine",
                AuditOutcome::Success,
            )
            .with_metadata("action_type", action_type.as_str())
            .with_metadata("from_tier", from_tier.as_str())
            .with_metadata("to_tier", to_tier.as_str()),
        );

        Ok(event)
    }

    /// Current autonomy score over the user's whole event history.
    pub async fn autonomy_score(&self, user_id: &UserId) -> Result<u8, PolicyServiceError> {
        let history = self.events.list_for_user(user_id).await?;
        Ok(autonomy_score(&history, ActionType::all()))
    }

    /// Score after each event prefix, oldest first. Entry 0 is the score
    /// before any event; the last entry is the current score.
    pub async fn autonomy_score_series(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<u8>, PolicyServiceError> {
        let history = self.events.list_for_user(user_id).await?;
        Ok(autonomy_score_series(&history, ActionType::all()))
    }

    /// Effective tier per tracked action type, resolved fresh.
    pub async fn tier_summary(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<(ActionType, PolicyTier)>, PolicyServiceError> {
        let mut summary = Vec::with_capacity(ActionType::all().len());
        for action_type in ActionType::all() {
            let tier = self.resolve_tier(user_id, *action_type).await?;
            summary.push((*action_type, tier));
        }
        Ok(summary)
    }

    pub async fn set_ceiling(&self, ceiling: ActionCeiling) -> Result<(), PolicyServiceError> {
        let action_type = ceiling.action_type;
        let max_ceiling = ceiling.max_ceiling;
        self.ceilings.set(ceiling).await?;

        self.audit.emit(
            AuditEvent::new(
                None,
                None,
                "policy",
                "policy.ceiling_updated",
                AuditCategory::Policy,
                "manager",
                AuditOutcome::Success,
            )
            .with_metadata("action_type", action_type.as_str())
            .with_metadata("max_ceiling", max_ceiling.as_str()),
        );
        Ok(())
    }

    /// Stores a user's tier preference as-is. Clamping happens at
    /// resolution time, never at write time.
    pub async fn set_override(
        &self,
        user_id: &UserId,
        action_type: ActionType,
        tier: PolicyTier,
    ) -> Result<(), PolicyServiceError> {
        self.overrides
            .set(TierOverride {
                user_id: user_id.clone(),
                action_type,
                tier,
                updated_at: Utc::now(),
            })
            .await?;

        self.audit.emit(
            AuditEvent::new(
                None,
                Some(user_id.clone()),
                "policy",
                "policy.override_set",
                AuditCategory::Policy,
                "user",
                AuditOutcome::Success,
            )
            .with_metadata("action_type", action_type.as_str())
            .with_metadata("tier", tier.as_str()),
        );
        Ok(())
    }

    pub async fn clear_override(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<(), PolicyServiceError> {
        self.overrides.clear(user_id, action_type).await?;

        self.audit.emit(
            AuditEvent::new(
                None,
                Some(user_id.clone()),
                "policy",
                "policy.override_cleared",
                AuditCategory::Policy,
                "user",
                AuditOutcome::Success,
            )
            .with_metadata("action_type", action_type.as_str()),
        );
        Ok(())
    }
}
