use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical demo seeds and verification contract for the two runnable
/// sequences and the rep-7 policy state.
const SEED_SEQUENCES: &[SeedSequenceContract] = &[
    SeedSequenceContract {
        sequence_key: "lead_followup",
        display_name: "Lead Follow-up",
        step_count: 5,
        parallel_step_count: 2,
        description: "Enrich, score, then draft and schedule in parallel",
    },
    SeedSequenceContract {
        sequence_key: "inbound_triage",
        display_name: "Inbound Lead Triage",
        step_count: 3,
        parallel_step_count: 0,
        description: "Enrich with retry, stage update, activity note",
    },
];

const SEED_USER_ID: &str = "rep-7";

const SEED_POLICY_EVENT_IDS: &[&str] =
    &["pe-demo-001", "pe-demo-002", "pe-demo-003", "pe-demo-004"];

const SEED_CEILING_ACTION_TYPES: &[&str] =
    &["data_enrich", "note_create", "email_send", "call_schedule", "crm_update"];

/// Expected materialized tier per action type for rep-7, matching a
/// replay of the seeded event log from the approve seed tier.
const SEED_OVERRIDE_TIERS: &[(&str, &str)] = &[
    ("data_enrich", "auto"),
    ("note_create", "auto"),
    ("email_send", "approve"),
    ("crm_update", "suggest"),
];

/// Demo seed dataset: two sequences plus a coherent policy state for one
/// demo user. Loading is idempotent; rows are keyed by fixed ids.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let sequences_seeded = SEED_SEQUENCES
            .iter()
            .map(|contract| SequenceSeedInfo {
                sequence_key: contract.sequence_key,
                display_name: contract.display_name,
                description: contract.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { sequences_seeded, demo_user_id: SEED_USER_ID })
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_SEQUENCES {
            let header_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sequence WHERE sequence_key = ?1 AND display_name = ?2)",
            )
            .bind(contract.sequence_key)
            .bind(contract.display_name)
            .fetch_one(pool)
            .await?;
            checks.push((contract.sequence_key, header_ok == 1));

            let step_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM sequence_step WHERE sequence_key = ?1")
                    .bind(contract.sequence_key)
                    .fetch_one(pool)
                    .await?;
            checks.push((contract.step_count_label(), step_count == contract.step_count));

            let parallel_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM sequence_step WHERE sequence_key = ?1 AND execution_mode = 'parallel'",
            )
            .bind(contract.sequence_key)
            .fetch_one(pool)
            .await?;
            checks.push((
                contract.parallel_label(),
                parallel_count == contract.parallel_step_count,
            ));
        }

        let ceiling_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM policy_ceiling").fetch_one(pool).await?;
        checks.push(("ceiling-coverage", ceiling_count == SEED_CEILING_ACTION_TYPES.len() as i64));

        let quoted_events = sql_array_from_ids(SEED_POLICY_EVENT_IDS);
        let event_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM policy_event WHERE id IN {quoted_events}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("policy-events", event_count == SEED_POLICY_EVENT_IDS.len() as i64));

        for (action_type, tier) in SEED_OVERRIDE_TIERS {
            let override_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM policy_override WHERE user_id = ?1 AND action_type = ?2 AND tier = ?3)",
            )
            .bind(SEED_USER_ID)
            .bind(action_type)
            .bind(tier)
            .fetch_one(pool)
            .await?;
            checks.push((*action_type, override_ok == 1));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_events = sql_array_from_ids(SEED_POLICY_EVENT_IDS);
        sqlx::query(&format!("DELETE FROM policy_event WHERE id IN {quoted_events}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM policy_override WHERE user_id = ?1")
            .bind(SEED_USER_ID)
            .execute(&mut *tx)
            .await?;

        let quoted_ceilings = sql_array_from_ids(SEED_CEILING_ACTION_TYPES);
        sqlx::query(&format!("DELETE FROM policy_ceiling WHERE action_type IN {quoted_ceilings}"))
            .execute(&mut *tx)
            .await?;

        let sequence_keys: Vec<&str> =
            SEED_SEQUENCES.iter().map(|contract| contract.sequence_key).collect();
        let quoted_sequences = sql_array_from_ids(&sequence_keys);
        sqlx::query(&format!(
            "DELETE FROM sequence_step WHERE sequence_key IN {quoted_sequences}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM sequence WHERE sequence_key IN {quoted_sequences}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedSequenceContract {
    sequence_key: &'static str,
    display_name: &'static str,
    step_count: i64,
    parallel_step_count: i64,
    description: &'static str,
}

impl SeedSequenceContract {
    fn step_count_label(&self) -> &'static str {
        match self.sequence_key {
            "lead_followup" => "lead-followup-step-count",
            _ => "inbound-triage-step-count",
        }
    }

    fn parallel_label(&self) -> &'static str {
        match self.sequence_key {
            "lead_followup" => "lead-followup-parallel-steps",
            _ => "inbound-triage-parallel-steps",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub sequences_seeded: Vec<SequenceSeedInfo>,
    pub demo_user_id: &'static str,
}

#[derive(Debug)]
pub struct SequenceSeedInfo {
    pub sequence_key: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!DemoSeedDataset::SQL.is_empty());
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect to test database");

        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification =
            DemoSeedDataset::verify(&pool).await.expect("verify seed fixtures");
        assert!(first_verification.all_present);
        assert_eq!(first.sequences_seeded.len(), 2);

        let second = DemoSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification =
            DemoSeedDataset::verify(&pool).await.expect("re-verify seed fixtures");
        assert!(second_verification.all_present);
        assert_eq!(second.sequences_seeded.len(), 2);
        assert_eq!(first_verification.checks, second_verification.checks);

        pool.close().await;
    }

    #[tokio::test]
    async fn seeded_sequences_decode_through_the_repository() {
        use cadence_core::domain::sequence::{ExecutionMode, InputBinding, SequenceKey};

        use crate::repositories::{SequenceRepository, SqlSequenceRepository};

        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        DemoSeedDataset::load(&pool).await.expect("load seed fixtures");

        let repo = SqlSequenceRepository::new(pool.clone());
        let sequence = repo
            .find_by_key(&SequenceKey("lead_followup".to_string()))
            .await
            .expect("load lead_followup")
            .expect("lead_followup should be seeded");

        assert_eq!(sequence.steps.len(), 5);
        assert_eq!(sequence.steps[0].binding_for("lead_id"), Some(&InputBinding::Reference {
            key: "lead_id".to_string(),
        }));
        assert_eq!(sequence.steps[2].execution_mode, ExecutionMode::Parallel);
        assert_eq!(sequence.steps[2].parallel_group, sequence.steps[3].parallel_group);

        pool.close().await;
    }

    #[tokio::test]
    async fn clean_removes_all_seeded_rows() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        DemoSeedDataset::clean(&pool).await.expect("clean seed fixtures");

        let verification = DemoSeedDataset::verify(&pool).await.expect("verify after clean");
        assert!(!verification.all_present);

        let remaining_steps: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM sequence_step")
            .fetch_one(&pool)
            .await
            .expect("count steps");
        assert_eq!(remaining_steps, 0);

        pool.close().await;
    }
}
