//! Zonecast Server - standalone headless orchestrator.
//!
//! Runs the queue and schedule ticks for every configured zone and serves the
//! trigger, admin and webhook routes.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use zonecast_core::db::PlaybackState;
use zonecast_core::{
    bootstrap_services, start_server, Clock, Database, ScheduleEvaluator, ScheduleExplanation,
    SystemClock, Zone,
};

use crate::config::ServerConfig;

/// Zonecast Server - schedule and visitor-queue orchestration for Sonos zones.
#[derive(Parser, Debug)]
#[command(name = "zonecast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ZONECAST_LOG_LEVEL", global = true)]
    log_level: log::LevelFilter,

    /// SQLite database file (overrides config file).
    #[arg(short = 'd', long, env = "ZONECAST_DATABASE_PATH", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator and HTTP server (default).
    Serve {
        /// Bind port (overrides config file).
        #[arg(short = 'p', long, env = "ZONECAST_BIND_PORT")]
        port: Option<u16>,

        /// Do not run the internal tick loops; rely on the trigger routes.
        #[arg(long)]
        no_internal_ticks: bool,
    },
    /// Print zones, schedule evaluation and playback state, then exit.
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Zonecast Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    match args.command.unwrap_or(Command::Serve {
        port: None,
        no_internal_ticks: false,
    }) {
        Command::Serve {
            port,
            no_internal_ticks,
        } => {
            if let Some(port) = port {
                config.bind_port = port;
            }
            if no_internal_ticks {
                config.core.run_internal_ticks = false;
            }
            serve(config).await
        }
        Command::Report => report(config).await,
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    log::info!(
        "Configuration: bind_port={}, database={}, internal_ticks={}",
        config.bind_port,
        config.database_path.display(),
        config.core.run_internal_ticks
    );

    let db = Database::connect(&config.database_path)
        .await
        .context("Failed to open database")?;
    let services =
        bootstrap_services(&config.to_core_config(), db).context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    services.start_tick_loops();

    let app_state = services.app_state().context("Failed to build application state")?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.bind_port));
    let cancel = services.cancel_token.clone();

    let server = tokio::spawn(async move {
        start_server(app_state, addr, async move { cancel.cancelled().await }).await
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    // Cancelling the token also stops the HTTP server gracefully.
    services.shutdown().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Server error: {}", e),
        Err(e) => log::error!("Server task failed: {}", e),
    }

    log::info!("Shutdown complete");
    Ok(())
}

#[derive(Serialize)]
struct ZoneReport {
    zone: Zone,
    household_id: Option<String>,
    active_requests: i64,
    playback: PlaybackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedules: Option<ScheduleExplanation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_error: Option<String>,
}

/// Read-only diagnostic dump of every zone.
async fn report(config: ServerConfig) -> Result<()> {
    let db = Database::connect(&config.database_path)
        .await
        .context("Failed to open database")?;
    let clock = SystemClock::arc();
    let evaluator = ScheduleEvaluator::new(db.clone(), clock.clone());

    let mut reports = Vec::new();
    for (zone, household_id) in db.list_zones_with_household().await? {
        let playback = db.playback_state(&zone.id, clock.now()).await?;
        let active_requests = db.count_active_requests(&zone.id).await?;
        let (schedules, schedule_error) = match evaluator.explain(&zone.id).await {
            Ok(explanation) => (Some(explanation), None),
            Err(e) => (None, Some(e.to_string())),
        };
        reports.push(ZoneReport {
            zone,
            household_id,
            active_requests,
            playback,
            schedules,
            schedule_error,
        });
    }

    print!("{}", serde_yaml::to_string(&reports)?);
    db.close().await;
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
