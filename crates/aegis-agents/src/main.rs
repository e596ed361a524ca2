//! Aegis runtime.
//!
//! # Usage
//!
//! ```bash
//! # HTTP surface plus every configured loop
//! aegis-agents serve
//!
//! # One loop on its own
//! AEGIS_VISION_URL=http://vision:9000/classify aegis-agents worker vision
//!
//! # Register stations from a file
//! aegis-agents seed-stations stations.example.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use aegis_agents::config::{AegisConfig, Environment};
use aegis_agents::runtime::{self, WorkerKind};
use aegis_agents::seed;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::directory::StationDirectory;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command-line arguments. Flags override the `AEGIS_*` environment.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file (overrides AEGIS_DB_PATH)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Deployment environment (overrides AEGIS_ENV)
    #[arg(long, global = true, value_enum)]
    env: Option<Environment>,

    /// Stop each loop after this many polls (overrides AEGIS_MAX_CYCLES)
    #[arg(long, global = true)]
    max_cycles: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server and every configured loop
    Serve {
        /// Listen address (overrides AEGIS_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run a single loop
    Worker {
        #[arg(value_enum)]
        kind: WorkerKind,
    },
    /// Register the stations listed in a TOML file
    SeedStations { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = AegisConfig::from_env().context("invalid configuration")?;
    if let Some(path) = args.db_path {
        config.db_path = path;
    }
    if let Some(env) = args.env {
        config.environment = env;
    }
    if let Some(max_cycles) = args.max_cycles {
        config.max_cycles = max_cycles;
    }

    let cancel = Arc::new(CancellationToken::new());
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            info!(
                bind = %config.bind,
                db = %config.db_path.display(),
                environment = ?config.environment,
                "Aegis starting"
            );
            let listener = tokio::net::TcpListener::bind(config.bind)
                .await
                .with_context(|| format!("cannot bind {}", config.bind))?;
            runtime::serve(&config, listener, cancel).await?;
        }
        Command::Worker { kind } => {
            let stats = runtime::run_worker(&config, kind, cancel).await?;
            info!(
                worker = ?kind,
                cycles = stats.cycles,
                processed = stats.processed,
                errors = stats.errors,
                "Worker finished"
            );
        }
        Command::SeedStations { file } => {
            let store = runtime::open_store(&config)?;
            let stations = seed::load_station_file(&file)?;
            let report = seed::seed_stations(&StationDirectory::new(store), stations)?;
            for station in &report.created {
                println!(
                    "{}\t{}\t{}\tapiKey={}",
                    station.id, station.station_type, station.name, station.api_key
                );
            }
            for name in &report.skipped {
                println!("skipped (exists)\t{name}");
            }
        }
    }

    Ok(())
}
