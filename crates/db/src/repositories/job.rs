use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::job::{Job, JobId, JobStatus, StepResult};
use cadence_core::domain::sequence::SequenceKey;
use cadence_core::domain::skill::UserId;

use super::{JobRepository, RepositoryError};
use crate::DbPool;

pub struct SqlJobRepository {
    pool: DbPool,
}

impl SqlJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobRepository for SqlJobRepository {
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                sequence_key,
                user_id,
                status,
                step_results,
                current_step,
                error_message,
                cancel_requested,
                revision,
                created_at,
                started_at,
                finished_at,
                updated_at
             FROM job
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(job_from_row).transpose()
    }

    // cancel_requested is monotonic: the MAX() fold keeps a flag set by
    // a concurrent `mark_cancel_requested` even when the incoming
    // snapshot was read before that flag landed.
    async fn save(&self, job: Job) -> Result<(), RepositoryError> {
        let step_results = serde_json::to_string(&job.step_results).map_err(|error| {
            RepositoryError::Decode(format!(
                "could not encode step results for job {}: {error}",
                job.id.0
            ))
        })?;

        sqlx::query(
            "INSERT INTO job (
                id,
                sequence_key,
                user_id,
                status,
                step_results,
                current_step,
                error_message,
                cancel_requested,
                revision,
                created_at,
                started_at,
                finished_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                sequence_key = excluded.sequence_key,
                user_id = excluded.user_id,
                status = excluded.status,
                step_results = excluded.step_results,
                current_step = excluded.current_step,
                error_message = excluded.error_message,
                cancel_requested = MAX(job.cancel_requested, excluded.cancel_requested),
                revision = excluded.revision,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                updated_at = excluded.updated_at",
        )
        .bind(&job.id.0)
        .bind(&job.sequence_key.0)
        .bind(&job.user_id.0)
        .bind(job.status.as_str())
        .bind(step_results)
        .bind(job.current_step.map(i64::from))
        .bind(job.error_message.as_deref())
        .bind(job.cancel_requested)
        .bind(i64::from(job.revision))
        .bind(job.created_at.to_rfc3339())
        .bind(job.started_at.map(|value| value.to_rfc3339()))
        .bind(job.finished_at.map(|value| value.to_rfc3339()))
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_cancel_requested(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        sqlx::query(
            "UPDATE job
             SET cancel_requested = 1,
                 revision = revision + 1,
                 updated_at = ?
             WHERE id = ?
               AND status IN ('queued', 'running')
               AND cancel_requested = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(
                "SELECT
                    id,
                    sequence_key,
                    user_id,
                    status,
                    step_results,
                    current_step,
                    error_message,
                    cancel_requested,
                    revision,
                    created_at,
                    started_at,
                    finished_at,
                    updated_at
                 FROM job
                 WHERE user_id = ? AND status = ?
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(&user_id.0)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT
                    id,
                    sequence_key,
                    user_id,
                    status,
                    step_results,
                    current_step,
                    error_message,
                    cancel_requested,
                    revision,
                    created_at,
                    started_at,
                    finished_at,
                    updated_at
                 FROM job
                 WHERE user_id = ?
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(&user_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(job_from_row).collect()
    }
}

fn job_from_row(row: SqliteRow) -> Result<Job, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown job status `{status_raw}`")))?;

    let step_results_raw = row.try_get::<String, _>("step_results")?;
    let step_results =
        serde_json::from_str::<Vec<StepResult>>(&step_results_raw).map_err(|error| {
            RepositoryError::Decode(format!("invalid step results payload: {error}"))
        })?;

    Ok(Job {
        id: JobId(row.try_get("id")?),
        sequence_key: SequenceKey(row.try_get("sequence_key")?),
        user_id: UserId(row.try_get("user_id")?),
        status,
        step_results,
        current_step: row
            .try_get::<Option<i64>, _>("current_step")?
            .map(|value| parse_u32("current_step", value))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        cancel_requested: row.try_get("cancel_requested")?,
        revision: parse_u32("revision", row.try_get("revision")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
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

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use cadence_core::domain::job::{Job, JobId, JobStatus, StepResult, StepStatus};
    use cadence_core::domain::sequence::SequenceKey;
    use cadence_core::domain::skill::{SkillKey, UserId};

    use super::SqlJobRepository;
    use crate::migrations;
    use crate::repositories::JobRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_job(user: &str) -> Job {
        let mut job =
            Job::new(SequenceKey("lead_followup".to_string()), UserId(user.to_string()));
        let mut result = StepResult::pending(1, SkillKey("enrich_lead".to_string()), "profile");
        result.status = StepStatus::Completed;
        result.output = Some(json!({"company": "Acme"}));
        result.attempts = 1;
        result.duration_ms = Some(12);
        job.step_results.push(result);
        job
    }

    #[tokio::test]
    async fn sql_job_repo_round_trips_results_and_flags() {
        let pool = setup_pool().await;
        let repo = SqlJobRepository::new(pool.clone());

        let mut job = sample_job("rep-7");
        job.status = JobStatus::Running;
        job.current_step = Some(2);
        job.cancel_requested = true;
        job.revision = 4;

        repo.save(job.clone()).await.expect("save job");

        let found = repo.find_by_id(&job.id).await.expect("find job");
        assert_eq!(found, Some(job));

        pool.close().await;
    }

    #[tokio::test]
    async fn upsert_applies_later_revisions_of_the_same_job() {
        let pool = setup_pool().await;
        let repo = SqlJobRepository::new(pool.clone());

        let mut job = sample_job("rep-7");
        repo.save(job.clone()).await.expect("save queued job");

        job.status = JobStatus::Completed;
        job.revision = 7;
        job.finished_at = Some(chrono::Utc::now());
        repo.save(job.clone()).await.expect("save terminal job");

        let found =
            repo.find_by_id(&job.id).await.expect("find job").expect("job should exist");
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.revision, 7);

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_cancel_requested_touches_only_the_flag() {
        let pool = setup_pool().await;
        let repo = SqlJobRepository::new(pool.clone());

        let mut job = sample_job("rep-7");
        job.status = JobStatus::Running;
        job.revision = 3;
        repo.save(job.clone()).await.expect("save running job");

        let flagged = repo
            .mark_cancel_requested(&job.id)
            .await
            .expect("mark cancel")
            .expect("job should exist");
        assert!(flagged.cancel_requested);
        assert_eq!(flagged.status, JobStatus::Running);
        assert_eq!(flagged.revision, 4);
        assert_eq!(flagged.step_results, job.step_results);
        assert_eq!(flagged.error_message, None);

        let repeated = repo
            .mark_cancel_requested(&job.id)
            .await
            .expect("mark cancel again")
            .expect("job should exist");
        assert_eq!(repeated.revision, 4);

        let mut finished = sample_job("rep-7");
        finished.status = JobStatus::Completed;
        repo.save(finished.clone()).await.expect("save finished job");
        let untouched = repo
            .mark_cancel_requested(&finished.id)
            .await
            .expect("mark cancel on finished job")
            .expect("job should exist");
        assert!(!untouched.cancel_requested);
        assert_eq!(untouched.revision, finished.revision);

        let missing = repo
            .mark_cancel_requested(&JobId("no-such-job".to_string()))
            .await
            .expect("mark cancel on missing job");
        assert_eq!(missing, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn save_cannot_clear_a_cancel_flag_already_in_the_store() {
        let pool = setup_pool().await;
        let repo = SqlJobRepository::new(pool.clone());

        let mut job = sample_job("rep-7");
        job.status = JobStatus::Running;
        job.revision = 2;
        repo.save(job.clone()).await.expect("save running job");
        repo.mark_cancel_requested(&job.id).await.expect("mark cancel");

        // A snapshot read before the cancel landed still carries the
        // old flag; writing it back must not erase the request.
        let mut stale = job.clone();
        stale.revision = 4;
        stale
            .step_results
            .push(StepResult::pending(2, SkillKey("score_lead".to_string()), "lead_score"));
        repo.save(stale).await.expect("save stale snapshot");

        let found =
            repo.find_by_id(&job.id).await.expect("find job").expect("job should exist");
        assert!(found.cancel_requested);
        assert_eq!(found.revision, 4);
        assert_eq!(found.step_results.len(), 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_for_user_filters_by_status() {
        let pool = setup_pool().await;
        let repo = SqlJobRepository::new(pool.clone());

        let queued = sample_job("rep-7");
        let mut completed = sample_job("rep-7");
        completed.status = JobStatus::Completed;
        let other_user = sample_job("rep-9");

        repo.save(queued.clone()).await.expect("save queued");
        repo.save(completed.clone()).await.expect("save completed");
        repo.save(other_user).await.expect("save other user");

        let all = repo
            .list_for_user(&UserId("rep-7".to_string()), None)
            .await
            .expect("list all");
        assert_eq!(all.len(), 2);

        let only_completed = repo
            .list_for_user(&UserId("rep-7".to_string()), Some(JobStatus::Completed))
            .await
            .expect("list completed");
        assert_eq!(only_completed.len(), 1);
        assert_eq!(only_completed[0].id, completed.id);

        pool.close().await;
    }
}
