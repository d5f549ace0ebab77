// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Powerverter.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use powerverter_core::RunRequest;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use powerverter_server::api;
use powerverter_server::config::ServerConfig;
use powerverter_server::db::Database;
use powerverter_server::engine::Engine;

#[derive(Parser)]
#[command(name = "powerverter")]
#[command(author, version, about = "Powerverter inverter schedule engine")]
#[command(
    long_about = "Evaluates weekly inverter power schedules and applies them exactly once.\n\
    \nExamples:\n  \
    powerverter serve                              # HTTP API, watchers and runner\n  \
    powerverter run-once --test-mode               # Evaluate without actuating\n  \
    powerverter watch --system-id sys-1            # Foreground watchers for one system"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        env = "POWERVERTER_CONFIG",
        default_value = "powerverter.toml",
        value_name = "PATH"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run the configured evaluators
    Serve,

    /// Run a single stateless sweep and print the report as JSON
    RunOnce {
        /// Limit the sweep to one system
        #[arg(long)]
        system_id: Option<String>,

        /// Evaluate only, never actuate
        #[arg(long, default_value_t = false)]
        test_mode: bool,

        /// Evaluate at this RFC 3339 instant instead of the synced clock
        #[arg(long, value_name = "RFC3339")]
        at: Option<DateTime<Utc>>,
    },

    /// Run schedule watchers in the foreground until Ctrl+C
    Watch {
        /// Watch only this system's schedules
        #[arg(long)]
        system_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(path = %cli.config, "Loading configuration");
    let config = Arc::new(ServerConfig::from_file(&cli.config)?);

    let db = Arc::new(Database::open(&config.database.path)?);
    info!(path = %config.database.path, "Database opened");

    let engine = Arc::new(Engine::build(Arc::clone(&config), Arc::clone(&db))?);
    let sync = engine.clock.sync().await;
    if !sync.is_synced {
        warn!("Initial clock sync failed, using local time until the next re-sync");
    }

    match cli.command {
        Commands::Serve => serve(engine).await,
        Commands::RunOnce {
            system_id,
            test_mode,
            at,
        } => {
            let report = engine
                .runner
                .run_once(&RunRequest {
                    system_id,
                    test_mode,
                    at,
                })
                .await
                .context("Schedule runner failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Watch { system_id } => {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let resync = Arc::clone(&engine.clock).spawn_resync(
                Duration::from_secs(config.clock.resync_interval_secs),
                cancel_rx.clone(),
            );
            let supervisor = tokio::spawn(engine.supervisor().run(system_id, cancel_rx));

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            info!("Shutting down watchers");
            let _ = cancel_tx.send(true);
            join_all(vec![resync, supervisor]).await;
            Ok(())
        }
    }
}

async fn serve(engine: Arc<Engine>) -> anyhow::Result<()> {
    let config = Arc::clone(&engine.config);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    tasks.push(Arc::clone(&engine.clock).spawn_resync(
        Duration::from_secs(config.clock.resync_interval_secs),
        cancel_rx.clone(),
    ));

    if config.watcher.enabled {
        tasks.push(tokio::spawn(engine.supervisor().run(None, cancel_rx.clone())));
    }

    if config.runner.enabled {
        let engine = Arc::clone(&engine);
        let mut cancel = cancel_rx.clone();
        let period = Duration::from_secs(config.runner.interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = engine.runner.run_once(&RunRequest::default()).await {
                            error!(error = %e, "Scheduled runner sweep failed");
                        }
                    }
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    // Trigger record cleanup (runs every 24 hours)
    {
        let db = Arc::clone(&engine.db);
        let retention_days = config.database.record_retention_days;
        let mut cancel = cancel_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(86400));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match db.cleanup_old_trigger_records(retention_days) {
                            Ok(deleted) if deleted > 0 => {
                                info!(deleted, "Cleaned up old trigger records");
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to clean up old trigger records");
                            }
                            _ => {}
                        }
                    }
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    let app = api::router(Arc::clone(&engine));
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Powerverter listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received");
        })
        .await?;

    let _ = cancel_tx.send(true);
    join_all(tasks).await;
    info!("Powerverter stopped");
    Ok(())
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}
