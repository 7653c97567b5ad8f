//! Questline Daemon - hosts the progression engine's scheduler.
//!
//! Runs daily and weekly resets, semester deadline checks and the inventory
//! sweep on a single-threaded timer loop until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use quest_common::config::config_path;
use quest_common::QuestConfig;
use questd::Engine;

#[derive(Parser)]
#[command(name = "questd")]
#[command(about = "Questline progression daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_file = args.config.unwrap_or_else(config_path);
    let config = QuestConfig::load_from(&config_file)
        .with_context(|| format!("loading {}", config_file.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Questline Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let engine = Arc::new(Engine::open(&config).context("opening engine")?);
    let mut scheduler = engine.build_scheduler();
    info!("Scheduled jobs: {}", scheduler.job_names().join(", "));

    let tick = Duration::from_secs(config.scheduler.effective_tick_interval());
    let mut interval = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ran = scheduler.tick(Utc::now());
                if !ran.is_empty() {
                    debug!("tick ran {:?}", ran);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down gracefully");
                break;
            }
        }
    }
    Ok(())
}
