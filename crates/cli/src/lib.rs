pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use cadence_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "cadence",
    about = "Cadence operator CLI",
    long_about = "Operate cadence migrations, demo fixtures, sequence runs, job inspection, and autonomy reporting.",
    after_help = "Examples:\n  cadence migrate\n  cadence seed\n  cadence run --sequence lead_followup --user rep-7 --context '{\"lead_id\":\"L-100\"}'\n  cadence status --job <job-id>\n  cadence autonomy --user rep-7"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Load the deterministic demo dataset: sequences, ceilings, and trust history"
    )]
    Seed,
    #[command(about = "Run a sequence for a user and follow job progress until it settles")]
    Run {
        #[arg(long, help = "Sequence key to execute, e.g. lead_followup")]
        sequence: String,
        #[arg(long, help = "User the run acts on behalf of")]
        user: String,
        #[arg(long, help = "Initial context as a JSON object, e.g. '{\"lead_id\":\"L-100\"}'")]
        context: Option<String>,
    },
    #[command(about = "Show the stored snapshot of one job")]
    Status {
        #[arg(long, help = "Job id returned by `cadence run`")]
        job: String,
    },
    #[command(about = "Show resolved autonomy tiers and the trust score for a user")]
    Autonomy {
        #[arg(long, help = "User to report on")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Run { sequence, user, context } => {
            commands::run::run(&sequence, &user, context.as_deref())
        }
        Command::Status { job } => commands::status::run(&job),
        Command::Autonomy { user } => commands::autonomy::run(&user),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the tracing subscriber described by the logging config.
/// Runtime logs go to stderr so stdout stays a single JSON payload per
/// invocation. Config errors fall back to defaults here; the command
/// itself reports them.
fn init_tracing() {
    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
