use std::sync::Arc;

use crate::commands::CommandResult;
use cadence_agent::audit::TracingAuditSink;
use cadence_agent::policy::PolicyService;
use cadence_core::config::{AppConfig, LoadOptions};
use cadence_core::domain::policy::PolicyTier;
use cadence_core::domain::skill::{ActionType, UserId};
use cadence_db::connect_with_settings;
use cadence_db::repositories::{
    SqlCeilingRepository, SqlOverrideRepository, SqlPolicyEventRepository,
};

pub fn run(user: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "autonomy",
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
                "autonomy",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let user_id = UserId(user.to_string());
    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let policy = PolicyService::new(
            Arc::new(SqlPolicyEventRepository::new(pool.clone())),
            Arc::new(SqlCeilingRepository::new(pool.clone())),
            Arc::new(SqlOverrideRepository::new(pool.clone())),
            Arc::new(TracingAuditSink),
            config.orchestrator.default_tier,
        );

        let tiers = policy
            .tier_summary(&user_id)
            .await
            .map_err(|error| ("persistence", error.to_string(), 4u8))?;
        let score = policy
            .autonomy_score(&user_id)
            .await
            .map_err(|error| ("persistence", error.to_string(), 4u8))?;
        let series = policy
            .autonomy_score_series(&user_id)
            .await
            .map_err(|error| ("persistence", error.to_string(), 4u8))?;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>((tiers, score, series))
    });

    match result {
        Ok((tiers, score, series)) => {
            CommandResult::success("autonomy", autonomy_report(user, score, &tiers, &series))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("autonomy", error_class, message, exit_code)
        }
    }
}

/// Per-action resolved tiers, the current trust score, and the score
/// after each recorded policy event.
fn autonomy_report(
    user: &str,
    score: u8,
    tiers: &[(ActionType, PolicyTier)],
    series: &[u8],
) -> String {
    let mut lines = Vec::with_capacity(tiers.len() + 2);
    lines.push(format!("autonomy report for {user} (score {score}):"));
    for (action_type, tier) in tiers {
        lines.push(format!("  - {}: {}", action_type.as_str(), tier.as_str()));
    }
    let rendered_series =
        series.iter().map(u8::to_string).collect::<Vec<_>>().join(", ");
    lines.push(format!("score series: {rendered_series}"));
    lines.join("\n")
}
