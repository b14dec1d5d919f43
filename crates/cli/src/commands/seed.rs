use crate::commands::CommandResult;
use cadence_core::config::{AppConfig, LoadOptions};
use cadence_db::{connect_with_settings, migrations, DemoSeedDataset, SeedResult, VerificationResult};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedResult, (&'static str, String, u8)> =
            if verification.all_present {
                Ok(seed_result)
            } else {
                Err(("seed_verification", verification_failure_message(&verification), 6u8))
            };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_summary(seeded: &SeedResult) -> String {
    let sequence_lines: Vec<String> = seeded
        .sequences_seeded
        .iter()
        .map(|info| format!("  - {}: {} ({})", info.sequence_key, info.display_name, info.description))
        .collect();
    format!(
        "demo dataset loaded for user {}:\n{}",
        seeded.demo_user_id,
        sequence_lines.join("\n")
    )
}

fn verification_failure_message(verification: &VerificationResult) -> String {
    let failed_checks = verification
        .checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use cadence_db::{SeedResult, SequenceSeedInfo, VerificationResult};

    use super::{seed_summary, verification_failure_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let verification = VerificationResult {
            all_present: false,
            checks: vec![
                ("lead_followup", true),
                ("inbound-triage-step-count", false),
                ("ceiling-coverage", false),
            ],
        };

        assert_eq!(
            verification_failure_message(&verification),
            "Seed verification failed for checks: inbound-triage-step-count, ceiling-coverage"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let verification = VerificationResult {
            all_present: false,
            checks: vec![("lead_followup", true), ("policy-events", true)],
        };

        assert_eq!(verification_failure_message(&verification), "Some seed data failed to load");
    }

    #[test]
    fn seed_summary_lists_each_sequence_with_its_description() {
        let seeded = SeedResult {
            sequences_seeded: vec![SequenceSeedInfo {
                sequence_key: "lead_followup",
                display_name: "Lead Follow-up",
                description: "Enrich, score, then draft and schedule in parallel",
            }],
            demo_user_id: "rep-7",
        };

        let summary = seed_summary(&seeded);
        assert!(summary.starts_with("demo dataset loaded for user rep-7:"));
        assert!(summary.contains(
            "  - lead_followup: Lead Follow-up (Enrich, score, then draft and schedule in parallel)"
        ));
    }
}
