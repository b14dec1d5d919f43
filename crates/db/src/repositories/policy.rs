use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::policy::{
    ActionCeiling, PolicyEvent, PolicyEventId, PolicyEventType, PolicyTier, TierOverride,
};
use cadence_core::domain::skill::{ActionType, UserId};

use super::{CeilingRepository, OverrideRepository, PolicyEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPolicyEventRepository {
    pool: DbPool,
}

impl SqlPolicyEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PolicyEventRepository for SqlPolicyEventRepository {
    async fn append(&self, event: PolicyEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO policy_event (
                id,
                user_id,
                action_type,
                event_type,
                from_tier,
                to_tier,
                reason,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id.0)
        .bind(&event.user_id.0)
        .bind(event.action_type.as_str())
        .bind(event.event_type.as_str())
        .bind(event.from_tier.as_str())
        .bind(event.to_tier.as_str())
        .bind(event.reason.as_deref())
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PolicyEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                action_type,
                event_type,
                from_tier,
                to_tier,
                reason,
                created_at
             FROM policy_event
             WHERE user_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(policy_event_from_row).collect()
    }

    async fn list_for_action(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<Vec<PolicyEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                action_type,
                event_type,
                from_tier,
                to_tier,
                reason,
                created_at
             FROM policy_event
             WHERE user_id = ? AND action_type = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&user_id.0)
        .bind(action_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(policy_event_from_row).collect()
    }
}

pub struct SqlCeilingRepository {
    pool: DbPool,
}

impl SqlCeilingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CeilingRepository for SqlCeilingRepository {
    async fn get(&self, action_type: ActionType) -> Result<Option<ActionCeiling>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                action_type,
                max_ceiling,
                auto_promotion_eligible,
                updated_by,
                updated_at
             FROM policy_ceiling
             WHERE action_type = ?",
        )
        .bind(action_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ceiling_from_row).transpose()
    }

    async fn set(&self, ceiling: ActionCeiling) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO policy_ceiling (
                action_type,
                max_ceiling,
                auto_promotion_eligible,
                updated_by,
                updated_at
             ) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(action_type) DO UPDATE SET
                max_ceiling = excluded.max_ceiling,
                auto_promotion_eligible = excluded.auto_promotion_eligible,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at",
        )
        .bind(ceiling.action_type.as_str())
        .bind(ceiling.max_ceiling.as_str())
        .bind(ceiling.auto_promotion_eligible)
        .bind(&ceiling.updated_by)
        .bind(ceiling.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<ActionCeiling>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                action_type,
                max_ceiling,
                auto_promotion_eligible,
                updated_by,
                updated_at
             FROM policy_ceiling
             ORDER BY action_type ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ceiling_from_row).collect()
    }
}

pub struct SqlOverrideRepository {
    pool: DbPool,
}

impl SqlOverrideRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OverrideRepository for SqlOverrideRepository {
    async fn get(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<Option<TierOverride>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                user_id,
                action_type,
                tier,
                updated_at
             FROM policy_override
             WHERE user_id = ? AND action_type = ?",
        )
        .bind(&user_id.0)
        .bind(action_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(override_from_row).transpose()
    }

    async fn set(&self, tier_override: TierOverride) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO policy_override (
                user_id,
                action_type,
                tier,
                updated_at
             ) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, action_type) DO UPDATE SET
                tier = excluded.tier,
                updated_at = excluded.updated_at",
        )
        .bind(&tier_override.user_id.0)
        .bind(tier_override.action_type.as_str())
        .bind(tier_override.tier.as_str())
        .bind(tier_override.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM policy_override WHERE user_id = ? AND action_type = ?")
            .bind(&user_id.0)
            .bind(action_type.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<TierOverride>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                user_id,
                action_type,
                tier,
                updated_at
             FROM policy_override
             WHERE user_id = ?
             ORDER BY action_type ASC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(override_from_row).collect()
    }
}

fn policy_event_from_row(row: SqliteRow) -> Result<PolicyEvent, RepositoryError> {
    let event_type_raw = row.try_get::<String, _>("event_type")?;
    let event_type = PolicyEventType::parse(&event_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown policy event type `{event_type_raw}`"))
    })?;

    Ok(PolicyEvent {
        id: PolicyEventId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        action_type: parse_action_type(row.try_get("action_type")?)?,
        event_type,
        from_tier: parse_tier("from_tier", row.try_get("from_tier")?)?,
        to_tier: parse_tier("to_tier", row.try_get("to_tier")?)?,
        reason: row.try_get("reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn ceiling_from_row(row: SqliteRow) -> Result<ActionCeiling, RepositoryError> {
    Ok(ActionCeiling {
        action_type: parse_action_type(row.try_get("action_type")?)?,
        max_ceiling: parse_tier("max_ceiling", row.try_get("max_ceiling")?)?,
        auto_promotion_eligible: row.try_get("auto_promotion_eligible")?,
        updated_by: row.try_get("updated_by")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn override_from_row(row: SqliteRow) -> Result<TierOverride, RepositoryError> {
    Ok(TierOverride {
        user_id: UserId(row.try_get("user_id")?),
        action_type: parse_action_type(row.try_get("action_type")?)?,
        tier: parse_tier("tier", row.try_get("tier")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_action_type(value: String) -> Result<ActionType, RepositoryError> {
    ActionType::parse(&value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action type `{value}`")))
}

fn parse_tier(column: &str, value: String) -> Result<PolicyTier, RepositoryError> {
    PolicyTier::parse(&value).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown policy tier in `{column}`: `{value}`"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
