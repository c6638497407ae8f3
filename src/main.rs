//! Perpetual position liquidation bot
//!
//! Watches leveraged positions on a perpetual engine and liquidates the ones
//! that cross the engine's risk threshold.
//! - `run`: long-lived process with live event tracking and an interval check loop
//! - `check`: one reconciliation and check pass, for external schedulers
//! - `backfill`: reconcile the tracked set from event history and exit

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_core::{BotConfig, ChainSettings, Orchestrator};

#[derive(Debug, Parser)]
#[command(name = "perp-liquidator", version, about = "Perpetual position liquidation bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run until SIGINT/SIGTERM (default)
    Run,
    /// Reconcile and check once, then exit
    Check,
    /// Reconcile the tracked set from event history, then exit
    Backfill {
        /// Ignore the stored cursor and rescan the full lookback range
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    // BOT_PROFILE selects: default, testing, production, or a TOML file path
    let bot_config = BotConfig::from_env().context("Invalid bot configuration")?;
    bot_config.log_config();

    let settings = ChainSettings::from_env().context("Invalid chain settings")?;
    info!(
        chain_id = settings.chain_id,
        contract = %settings.contract,
        rpc = %settings.rpc_url,
        ws = settings.ws_url.as_deref().unwrap_or("-"),
        redis = settings.redis_url.is_some(),
        "Starting perpetual liquidator"
    );

    let orchestrator = Orchestrator::connect(&bot_config, &settings).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            orchestrator
                .run_until_shutdown(shutdown_signal())
                .await
                .context("Startup reconciliation failed")?;
        }
        Command::Check => {
            let report = orchestrator.execute_check().await;
            info!(
                checked = report.checked,
                eligible = report.eligible.len(),
                liquidated = report.liquidated(),
                "Check finished"
            );
        }
        Command::Backfill { full } => {
            let report = orchestrator
                .backfill_positions(full)
                .await
                .context("Backfill failed")?;
            info!(
                from = report.from_block,
                to = report.to_block,
                added = report.added,
                persisted = report.persisted,
                tracked = orchestrator.tracker().len(),
                "Backfill finished"
            );
        }
    }

    Ok(())
}

/// Text logs by default, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,liquidator_core=debug,liquidator_chain=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
