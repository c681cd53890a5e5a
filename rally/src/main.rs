use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod telemetry;

#[derive(Parser)]
#[command(name = "rally", about = "Donor leaderboard and costume vote service")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the ranking API, the donation webhook and the admin probes
    Serve(ServeArgs),
    /// Compile the ranking once and print it as JSON
    Ranking(RankingArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    config: PathBuf,
}

#[derive(Args)]
struct RankingArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    pretty: bool,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Leaderboard(#[from] leaderboard::LeaderboardError),
    #[error(transparent)]
    Ranking(#[from] leaderboard::cache::CacheError),
    #[error("could not encode ranking: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Serve(args) => serve(args),
        CliCommand::Ranking(args) => ranking(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "rally exited with an error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

fn serve(args: ServeArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config)?;
    config.validate()?;

    let _sentry = telemetry::init_logging(&config.logging);
    if let Some(metrics) = &config.metrics {
        telemetry::init_metrics(metrics)?;
    }

    tracing::info!(
        campaign = %config.leaderboard.raisely.campaign_path,
        "starting leaderboard"
    );
    runtime()?.block_on(leaderboard::run(config.leaderboard))?;
    Ok(())
}

fn ranking(args: RankingArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config)?;
    let _sentry = telemetry::init_logging(&config.logging);

    let snapshot = runtime()?.block_on(leaderboard::current_ranking(&config.leaderboard))?;
    let output = if args.pretty {
        serde_json::to_string_pretty(&*snapshot)?
    } else {
        serde_json::to_string(&*snapshot)?
    };
    println!("{output}");
    Ok(())
}
