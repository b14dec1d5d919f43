use std::collections::HashMap;

use thiserror::Error;

use crate::domain::policy::{PolicyEvent, PolicyEventType, PolicyTier};
use crate::domain::skill::ActionType;

/// Ceiling applied when no ceiling row exists for an action type.
pub const DEFAULT_CEILING: PolicyTier = PolicyTier::Approve;

/// Tier every tracked action type starts from when replaying the event
/// log for scoring.
pub const SCORE_SEED_TIER: PolicyTier = PolicyTier::Approve;

/// An attempted tier transition that the engine refuses to record. The
/// event log stays untouched when any of these fire.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("event claims current tier {found:?} but the stored tier is {expected:?}")]
    FromTierMismatch { expected: PolicyTier, found: PolicyTier },
    #[error("promotion must move upward, got {from:?} -> {to:?}")]
    NotUpward { from: PolicyTier, to: PolicyTier },
    #[error("promotion to {requested:?} exceeds the {ceiling:?} ceiling")]
    ExceedsCeiling { requested: PolicyTier, ceiling: PolicyTier },
    #[error("action type {action_type:?} is not eligible for promotion")]
    PromotionIneligible { action_type: ActionType },
    #[error("demotion must move downward, got {from:?} -> {to:?}")]
    NotDownward { from: PolicyTier, to: PolicyTier },
    #[error("a rejected promotion keeps the current tier, got {from:?} -> {to:?}")]
    RejectionMustKeepTier { from: PolicyTier, to: PolicyTier },
}

/// Resolves the tier a user actually operates at for one action type.
///
/// The stored tier is the user override when present, otherwise the org
/// default. Either way the result is clamped to the ceiling, so a
/// freshly lowered ceiling wins over any previously stored tier.
pub fn effective_tier(
    org_default: PolicyTier,
    user_override: Option<PolicyTier>,
    ceiling: Option<PolicyTier>,
) -> PolicyTier {
    let stored = user_override.unwrap_or(org_default);
    let ceiling = ceiling.unwrap_or(DEFAULT_CEILING);
    stored.min(ceiling)
}

/// Checks that a proposed policy event is legal against the current
/// stored tier and a fresh ceiling read.
///
/// Promotions move upward, stay at or under the ceiling, and require
/// the action type to be promotion-eligible. Demotions move downward
/// unconditionally; safety demotions are never blocked. A rejection
/// records the refusal without moving the tier.
pub fn validate_policy_event(
    current_tier: PolicyTier,
    ceiling: PolicyTier,
    auto_promotion_eligible: bool,
    action_type: ActionType,
    event_type: PolicyEventType,
    from_tier: PolicyTier,
    to_tier: PolicyTier,
) -> Result<(), PolicyViolation> {
    if from_tier != current_tier {
        return Err(PolicyViolation::FromTierMismatch {
            expected: current_tier,
            found: from_tier,
        });
    }

    match event_type {
        PolicyEventType::PromotionAccepted => {
            if to_tier <= from_tier {
                return Err(PolicyViolation::NotUpward { from: from_tier, to: to_tier });
            }
            if !auto_promotion_eligible {
                return Err(PolicyViolation::PromotionIneligible { action_type });
            }
            if to_tier > ceiling {
                return Err(PolicyViolation::ExceedsCeiling { requested: to_tier, ceiling });
            }
        }
        PolicyEventType::PromotionRejected => {
            if to_tier != from_tier {
                return Err(PolicyViolation::RejectionMustKeepTier {
                    from: from_tier,
                    to: to_tier,
                });
            }
        }
        PolicyEventType::DemotionAuto | PolicyEventType::DemotionEmergency => {
            if to_tier >= from_tier {
                return Err(PolicyViolation::NotDownward { from: from_tier, to: to_tier });
            }
        }
    }

    Ok(())
}

/// Replays one action type's events on top of a seed tier. Events that
/// do not change the tier, rejections, are skipped.
pub fn replay_tier(seed: PolicyTier, events: &[PolicyEvent]) -> PolicyTier {
    events
        .iter()
        .filter(|event| event.event_type.changes_tier())
        .fold(seed, |_, event| event.to_tier)
}

/// Autonomy score over a chronological event prefix: the percentage of
/// tracked action types currently at `auto`, each seeded at `approve`.
///
/// Pure over its inputs, so "score as of event N" is
/// `autonomy_score(&events[..n], tracked)`.
pub fn autonomy_score(events: &[PolicyEvent], tracked: &[ActionType]) -> u8 {
    if tracked.is_empty() {
        return 0;
    }

    let mut tiers: HashMap<ActionType, PolicyTier> =
        tracked.iter().map(|action| (*action, SCORE_SEED_TIER)).collect();

    for event in events {
        if !event.event_type.changes_tier() {
            continue;
        }
        if let Some(tier) = tiers.get_mut(&event.action_type) {
            *tier = event.to_tier;
        }
    }

    let at_auto = tiers.values().filter(|tier| **tier == PolicyTier::Auto).count();
    ((100 * at_auto) / tracked.len()) as u8
}

/// Score after every successive event prefix, starting with the empty
/// prefix. The result has `events.len() + 1` entries; entry `n` is the
/// score as of event `n`.
pub fn autonomy_score_series(events: &[PolicyEvent], tracked: &[ActionType]) -> Vec<u8> {
    (0..=events.len()).map(|n| autonomy_score(&events[..n], tracked)).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        autonomy_score, autonomy_score_series, effective_tier, replay_tier,
        validate_policy_event, PolicyViolation,
    };
    use crate::domain::policy::{PolicyEvent, PolicyEventId, PolicyEventType, PolicyTier};
    use crate::domain::skill::{ActionType, UserId};

    fn event(
        action_type: ActionType,
        event_type: PolicyEventType,
        from_tier: PolicyTier,
        to_tier: PolicyTier,
    ) -> PolicyEvent {
        PolicyEvent {
            id: PolicyEventId::generate(),
            user_id: UserId("rep-7".to_string()),
            action_type,
            event_type,
            from_tier,
            to_tier,
            reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn override_above_ceiling_clamps_to_ceiling() {
        let tier = effective_tier(
            PolicyTier::Suggest,
            Some(PolicyTier::Auto),
            Some(PolicyTier::Approve),
        );
        assert_eq!(tier, PolicyTier::Approve);
    }

    #[test]
    fn missing_ceiling_defaults_to_approve() {
        let tier = effective_tier(PolicyTier::Suggest, Some(PolicyTier::Auto), None);
        assert_eq!(tier, PolicyTier::Approve);
    }

    #[test]
    fn org_default_applies_when_no_override_exists() {
        let tier = effective_tier(PolicyTier::Suggest, None, Some(PolicyTier::Auto));
        assert_eq!(tier, PolicyTier::Suggest);
    }

    #[test]
    fn promotion_above_ceiling_is_a_violation() {
        let result = validate_policy_event(
            PolicyTier::Approve,
            PolicyTier::Approve,
            true,
            ActionType::EmailSend,
            PolicyEventType::PromotionAccepted,
            PolicyTier::Approve,
            PolicyTier::Auto,
        );
        assert_eq!(
            result,
            Err(PolicyViolation::ExceedsCeiling {
                requested: PolicyTier::Auto,
                ceiling: PolicyTier::Approve,
            })
        );
    }

    #[test]
    fn promotion_while_ineligible_is_a_violation() {
        let result = validate_policy_event(
            PolicyTier::Approve,
            PolicyTier::Auto,
            false,
            ActionType::CrmUpdate,
            PolicyEventType::PromotionAccepted,
            PolicyTier::Approve,
            PolicyTier::Auto,
        );
        assert_eq!(
            result,
            Err(PolicyViolation::PromotionIneligible { action_type: ActionType::CrmUpdate })
        );
    }

    #[test]
    fn safety_demotion_ignores_the_ceiling() {
        let result = validate_policy_event(
            PolicyTier::Auto,
            PolicyTier::Suggest,
            false,
            ActionType::EmailSend,
            PolicyEventType::DemotionEmergency,
            PolicyTier::Auto,
            PolicyTier::Disabled,
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn from_tier_must_match_the_stored_tier() {
        let result = validate_policy_event(
            PolicyTier::Suggest,
            PolicyTier::Auto,
            true,
            ActionType::EmailSend,
            PolicyEventType::PromotionAccepted,
            PolicyTier::Approve,
            PolicyTier::Auto,
        );
        assert_eq!(
            result,
            Err(PolicyViolation::FromTierMismatch {
                expected: PolicyTier::Suggest,
                found: PolicyTier::Approve,
            })
        );
    }

    #[test]
    fn rejection_keeps_the_tier_in_replay() {
        let events = vec![
            event(
                ActionType::EmailSend,
                PolicyEventType::PromotionRejected,
                PolicyTier::Approve,
                PolicyTier::Approve,
            ),
            event(
                ActionType::EmailSend,
                PolicyEventType::PromotionAccepted,
                PolicyTier::Approve,
                PolicyTier::Auto,
            ),
        ];
        assert_eq!(replay_tier(PolicyTier::Approve, &events[..1]), PolicyTier::Approve);
        assert_eq!(replay_tier(PolicyTier::Approve, &events), PolicyTier::Auto);
    }

    #[test]
    fn score_counts_tracked_action_types_at_auto() {
        let tracked = [ActionType::EmailSend, ActionType::CrmUpdate, ActionType::DataEnrich];
        let events = vec![
            event(
                ActionType::EmailSend,
                PolicyEventType::PromotionAccepted,
                PolicyTier::Approve,
                PolicyTier::Auto,
            ),
            event(
                ActionType::DataEnrich,
                PolicyEventType::PromotionAccepted,
                PolicyTier::Approve,
                PolicyTier::Auto,
            ),
        ];

        assert_eq!(autonomy_score(&events, &tracked), 66);
    }

    #[test]
    fn score_is_a_pure_function_of_the_event_prefix() {
        let tracked = [ActionType::EmailSend, ActionType::CrmUpdate];
        let events = vec![
            event(
                ActionType::EmailSend,
                PolicyEventType::PromotionAccepted,
                PolicyTier::Approve,
                PolicyTier::Auto,
            ),
            event(
                ActionType::EmailSend,
                PolicyEventType::DemotionAuto,
                PolicyTier::Auto,
                PolicyTier::Approve,
            ),
        ];

        let first = autonomy_score(&events, &tracked);
        let second = autonomy_score(&events, &tracked);
        assert_eq!(first, second);
        assert_eq!(autonomy_score(&events[..1], &tracked), 50);
        assert_eq!(first, 0);
    }

    #[test]
    fn score_series_starts_at_the_seed_and_tracks_every_prefix() {
        let tracked = [ActionType::EmailSend];
        let events = vec![
            event(
                ActionType::EmailSend,
                PolicyEventType::PromotionAccepted,
                PolicyTier::Approve,
                PolicyTier::Auto,
            ),
            event(
                ActionType::EmailSend,
                PolicyEventType::DemotionEmergency,
                PolicyTier::Auto,
                PolicyTier::Disabled,
            ),
        ];

        assert_eq!(autonomy_score_series(&events, &tracked), vec![0, 100, 0]);
    }

    #[test]
    fn empty_tracked_set_scores_zero() {
        assert_eq!(autonomy_score(&[], &[]), 0);
    }

    #[test]
    fn untracked_action_types_do_not_move_the_score() {
        let tracked = [ActionType::EmailSend];
        let events = vec![event(
            ActionType::NoteCreate,
            PolicyEventType::PromotionAccepted,
            PolicyTier::Approve,
            PolicyTier::Auto,
        )];
        assert_eq!(autonomy_score(&events, &tracked), 0);
    }
}
