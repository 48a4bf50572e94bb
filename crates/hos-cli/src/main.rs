use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hos_cli::commands::log::EndOptions;
use hos_cli::commands::{log, recompute, report, trip};
use hos_cli::{Cli, Commands, Config, Estimator, Ledger, LogAction, TripAction};

/// Load config and open the ledger, ensuring the database directory exists.
fn open_ledger(config_path: Option<&Path>) -> Result<Ledger> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = hos_db::Database::open(&config.database_path).context("failed to open database")?;
    let estimator = Estimator::from_config(&config).context("failed to set up estimator")?;
    Ok(Ledger::new(db, estimator, config.estimator_timeout()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let ledger = open_ledger(cli.config.as_deref())?;
    let now = Utc::now();
    match command {
        Commands::Trip(action) => match action {
            TripAction::Start(args) => {
                trip::start(&ledger, args)?;
            }
            TripAction::End { trip_id } => trip::end(&ledger, *trip_id)?,
            TripAction::Show { trip_id, json } => trip::show(&ledger, *trip_id, *json)?,
            TripAction::List { json } => trip::list(&ledger, *json)?,
            TripAction::Delete { trip_id } => trip::delete(&ledger, *trip_id)?,
        },
        Commands::Log(action) => match action {
            LogAction::Open { trip, date } => {
                log::open(&ledger, *trip, date)?;
            }
            LogAction::End {
                log_id,
                remarks,
                at,
                lat,
                lon,
            } => {
                let options = EndOptions {
                    remarks: remarks.as_deref(),
                    at: at.as_deref(),
                    lat: *lat,
                    lon: *lon,
                };
                log::end(&ledger, *log_id, options, now).await?;
            }
            LogAction::Show { log_id, json } => log::show(&ledger, *log_id, *json)?,
            LogAction::Correct {
                log_id,
                status,
                start,
                end,
                remarks,
            } => {
                log::correct(&ledger, *log_id, *status, start, end, remarks.clone(), now).await?;
            }
            LogAction::RemoveInterval { interval_id } => {
                log::remove_interval(&ledger, *interval_id).await?;
            }
        },
        Commands::Report(args) => {
            report::run(&ledger, args, now).await?;
        }
        Commands::Recompute { trip } => {
            recompute::run(&ledger, *trip)?;
        }
    }

    Ok(())
}
