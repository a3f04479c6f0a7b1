use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tl_cli::commands::{delete, drive, logs, outbox, parse, status, sync};
use tl_cli::gps::ReplayFeed;
use tl_cli::{Cli, Commands, Config, Tracker};
use tl_core::{LatLng, LocationSource, NoLocation};
use tl_db::Database;
use tl_sync::{Connectivity, Synchronizer};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn synchronizer(config: &Config) -> Result<Synchronizer> {
    Synchronizer::from_endpoint(config.sheets_webapp_url.as_deref())
        .context("invalid SHEETS_WEBAPP_URL")
}

fn tracker(
    db: Database,
    config: &Config,
    location: Box<dyn LocationSource>,
    online: bool,
) -> Result<Tracker<Database>> {
    Ok(Tracker::new(
        db,
        synchronizer(config)?,
        location,
        Connectivity::new(online),
        Duration::from_secs(config.location_timeout_secs),
    ))
}

async fn run(cli: Cli) -> Result<()> {
    let online = !cli.offline;
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Some(Commands::Drive {
            gps,
            gps_interval_ms,
            lat,
            lng,
        }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let location: Box<dyn LocationSource> = match gps {
                Some(path) => {
                    Box::new(ReplayFeed::open(path, Duration::from_millis(*gps_interval_ms)).await?)
                }
                None => Box::new(NoLocation),
            };
            let fallback = match (lat, lng) {
                (Some(lat), Some(lng)) => Some(
                    LatLng::new(*lat, *lng)
                        .validate()
                        .context("invalid starting position")?,
                ),
                _ => None,
            };
            let mut tracker = tracker(db, &config, location, online)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            drive::run(&mut tracker, stdin, &mut stdout, fallback).await?;
        }
        Some(Commands::Logs { json }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            logs::run(&mut stdout, &db, *json)?;
        }
        Some(Commands::Outbox { json }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            outbox::run(&mut stdout, &db, *json)?;
        }
        Some(Commands::Delete { id }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            delete::run(&mut stdout, &mut db, *id)?;
        }
        Some(Commands::Sync) => {
            let (mut db, config) = open_database(cli.config.as_deref())?;
            let sync = synchronizer(&config)?;
            sync::run(&mut stdout, &mut db, &sync, Connectivity::new(online)).await?;
        }
        Some(Commands::Parse { text, save }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let client = tl_llm::Client::from_config(config.openai_api_key.as_deref())
                .context("natural-language parsing is disabled")?;
            if *save {
                let mut tracker = tracker(db, &config, Box::new(NoLocation), online)?;
                parse::run(
                    &mut stdout,
                    &client,
                    &config.openai_model,
                    text,
                    Some(&mut tracker),
                )
                .await?;
            } else {
                parse::run::<_, Database>(&mut stdout, &client, &config.openai_model, text, None)
                    .await?;
            }
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &db, &config)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support; stdout is for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(run(cli));
    // A pending stdin read cannot be cancelled; do not wait for it.
    runtime.shutdown_background();
    result
}
