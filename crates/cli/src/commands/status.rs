use crate::commands::run::render_job_summary;
use crate::commands::CommandResult;
use cadence_core::config::{AppConfig, LoadOptions};
use cadence_core::domain::job::JobId;
use cadence_db::connect_with_settings;
use cadence_db::repositories::{JobRepository, SqlJobRepository};

pub fn run(job: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "status",
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
                "status",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let job_id = JobId(job.to_string());
    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let jobs = SqlJobRepository::new(pool.clone());
        let stored = jobs
            .find_by_id(&job_id)
            .await
            .map_err(|error| ("persistence", error.to_string(), 4u8))?;

        pool.close().await;
        stored.ok_or_else(|| ("not_found", format!("job `{job_id}` was not found"), 8u8))
    });

    match result {
        Ok(job) => CommandResult::success("status", render_job_summary(&job)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("status", error_class, message, exit_code)
        }
    }
}
