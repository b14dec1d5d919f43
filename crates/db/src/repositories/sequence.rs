use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::sequence::{
    ExecutionMode, InputBinding, OnFailure, Sequence, SequenceKey, SequenceStep,
};
use cadence_core::domain::skill::SkillKey;

use super::{RepositoryError, SequenceRepository};
use crate::DbPool;

pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SequenceRepository for SqlSequenceRepository {
    async fn find_by_key(&self, key: &SequenceKey) -> Result<Option<Sequence>, RepositoryError> {
        let header = sqlx::query(
            "SELECT sequence_key, display_name, created_at, updated_at
             FROM sequence
             WHERE sequence_key = ?",
        )
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let step_rows = sqlx::query(
            "SELECT
                step_order,
                skill_key,
                input_bindings,
                output_key,
                on_failure,
                execution_mode,
                parallel_group
             FROM sequence_step
             WHERE sequence_key = ?
             ORDER BY step_order ASC",
        )
        .bind(&key.0)
        .fetch_all(&self.pool)
        .await?;

        let steps =
            step_rows.into_iter().map(step_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Sequence {
            key: SequenceKey(header.try_get("sequence_key")?),
            display_name: header.try_get("display_name")?,
            steps,
            created_at: parse_timestamp("created_at", header.try_get("created_at")?)?,
            updated_at: parse_timestamp("updated_at", header.try_get("updated_at")?)?,
        }))
    }

    async fn save(&self, sequence: Sequence) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sequence (sequence_key, display_name, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(sequence_key) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = excluded.updated_at",
        )
        .bind(&sequence.key.0)
        .bind(&sequence.display_name)
        .bind(sequence.created_at.to_rfc3339())
        .bind(sequence.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        // Steps are replaced wholesale; partial step edits do not exist.
        sqlx::query("DELETE FROM sequence_step WHERE sequence_key = ?")
            .bind(&sequence.key.0)
            .execute(&mut *tx)
            .await?;

        for step in &sequence.steps {
            let bindings = serde_json::to_string(&step.input_bindings).map_err(|error| {
                RepositoryError::Decode(format!(
                    "could not encode input bindings for step {}: {error}",
                    step.step_order
                ))
            })?;

            sqlx::query(
                "INSERT INTO sequence_step (
                    sequence_key,
                    step_order,
                    skill_key,
                    input_bindings,
                    output_key,
                    on_failure,
                    execution_mode,
                    parallel_group
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&sequence.key.0)
            .bind(i64::from(step.step_order))
            .bind(&step.skill_key.0)
            .bind(bindings)
            .bind(&step.output_key)
            .bind(step.on_failure.as_str())
            .bind(step.execution_mode.as_str())
            .bind(step.parallel_group.map(i64::from))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<SequenceKey>, RepositoryError> {
        let rows = sqlx::query("SELECT sequence_key FROM sequence ORDER BY sequence_key ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Ok(SequenceKey(row.try_get("sequence_key")?)))
            .collect()
    }
}

fn step_from_row(row: SqliteRow) -> Result<SequenceStep, RepositoryError> {
    let on_failure_raw = row.try_get::<String, _>("on_failure")?;
    let on_failure = OnFailure::parse(&on_failure_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown on_failure mode `{on_failure_raw}`"))
    })?;

    let execution_mode_raw = row.try_get::<String, _>("execution_mode")?;
    let execution_mode = ExecutionMode::parse(&execution_mode_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown execution mode `{execution_mode_raw}`"))
    })?;

    let bindings_raw = row.try_get::<String, _>("input_bindings")?;
    let input_bindings =
        serde_json::from_str::<Vec<(String, InputBinding)>>(&bindings_raw).map_err(|error| {
            RepositoryError::Decode(format!("invalid input bindings `{bindings_raw}`: {error}"))
        })?;

    Ok(SequenceStep {
        step_order: parse_u32("step_order", row.try_get("step_order")?)?,
        skill_key: SkillKey(row.try_get("skill_key")?),
        input_bindings,
        output_key: row.try_get("output_key")?,
        on_failure,
        execution_mode,
        parallel_group: row
            .try_get::<Option<i64>, _>("parallel_group")?
            .map(|value| parse_u32("parallel_group", value))
            .transpose()?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use cadence_core::domain::sequence::{
        ExecutionMode, InputBinding, OnFailure, Sequence, SequenceKey, SequenceStep,
    };
    use cadence_core::domain::skill::SkillKey;

    use super::SqlSequenceRepository;
    use crate::migrations;
    use crate::repositories::SequenceRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_sequence() -> Sequence {
        let steps = vec![
            SequenceStep {
                step_order: 1,
                skill_key: SkillKey("enrich_lead".to_string()),
                input_bindings: vec![(
                    "lead_id".to_string(),
                    InputBinding::Literal { value: json!("L-100") },
                )],
                output_key: "profile".to_string(),
                on_failure: OnFailure::Stop,
                execution_mode: ExecutionMode::Sequential,
                parallel_group: None,
            },
            SequenceStep {
                step_order: 2,
                skill_key: SkillKey("draft_followup_email".to_string()),
                input_bindings: vec![
                    ("lead_id".to_string(), InputBinding::Literal { value: json!("L-100") }),
                    (
                        "profile".to_string(),
                        InputBinding::Reference { key: "profile".to_string() },
                    ),
                ],
                output_key: "email".to_string(),
                on_failure: OnFailure::Retry,
                execution_mode: ExecutionMode::Parallel,
                parallel_group: Some(1),
            },
        ];
        Sequence::new(SequenceKey("lead_followup".to_string()), "Lead Follow-up", steps)
    }

    #[tokio::test]
    async fn sql_sequence_repo_round_trips_steps_and_bindings() {
        let pool = setup_pool().await;
        let repo = SqlSequenceRepository::new(pool.clone());
        let sequence = sample_sequence();

        repo.save(sequence.clone()).await.expect("save sequence");

        let found = repo.find_by_key(&sequence.key).await.expect("find sequence");
        let found = found.expect("sequence should exist");
        assert_eq!(found.key, sequence.key);
        assert_eq!(found.display_name, sequence.display_name);
        assert_eq!(found.steps, sequence.steps);

        pool.close().await;
    }

    #[tokio::test]
    async fn saving_again_replaces_the_step_list() {
        let pool = setup_pool().await;
        let repo = SqlSequenceRepository::new(pool.clone());
        let mut sequence = sample_sequence();

        repo.save(sequence.clone()).await.expect("save sequence");

        sequence.steps.truncate(1);
        repo.save(sequence.clone()).await.expect("re-save sequence");

        let found = repo
            .find_by_key(&sequence.key)
            .await
            .expect("find sequence")
            .expect("sequence should exist");
        assert_eq!(found.step_count(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_keys_returns_sorted_keys() {
        let pool = setup_pool().await;
        let repo = SqlSequenceRepository::new(pool.clone());

        let mut second = sample_sequence();
        second.key = SequenceKey("b_sequence".to_string());
        let mut first = sample_sequence();
        first.key = SequenceKey("a_sequence".to_string());

        repo.save(second).await.expect("save second");
        repo.save(first).await.expect("save first");

        let keys = repo.list_keys().await.expect("list keys");
        assert_eq!(
            keys,
            vec![SequenceKey("a_sequence".to_string()), SequenceKey("b_sequence".to_string())]
        );

        pool.close().await;
    }
}
