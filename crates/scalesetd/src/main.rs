//! scalesetd — the runner scale-set daemon.
//!
//! Single binary that assembles the scale-set subsystems:
//! - Fleet store (redb)
//! - Listener worker (desired replica calculator)
//! - Controller runtime (runner set reconciler)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! scalesetd run --config scaleset.toml --port 8080 --data-dir /var/lib/scaleset
//! scalesetd check-config --config scaleset.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use scaleset_core::ScaleSetConfig;
use scaleset_state::StateStore;
use scalesetd::{Daemon, actions_service};

#[derive(Parser)]
#[command(name = "scalesetd", about = "Runner scale-set daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the listener, controller and API for one runner set.
    Run {
        /// Path to scaleset.toml.
        #[arg(long, default_value = "scaleset.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/scaleset")]
        data_dir: PathBuf,
    },

    /// Parse and validate a configuration file, then exit.
    CheckConfig {
        /// Path to scaleset.toml.
        #[arg(long, default_value = "scaleset.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => run(&config, port, &data_dir).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,scaleset=debug,scalesetd=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = ScaleSetConfig::from_file(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    let max = config
        .scale_set
        .max_runners
        .map_or_else(|| "unbounded".to_string(), |m| m.to_string());
    println!(
        "{}: runner set {}/{} (min {}, max {}, scale-up factor {})",
        path.display(),
        config.scale_set.namespace,
        config.scale_set.name,
        config.scale_set.min_runners,
        max,
        config.scale_set.scale_up_factor,
    );
    Ok(())
}

async fn run(config_path: &Path, port: u16, data_dir: &Path) -> anyhow::Result<()> {
    info!("scale-set daemon starting");

    let config = ScaleSetConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!(path = %config_path.display(), "configuration loaded");

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("scaleset.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "fleet store opened");

    let actions = actions_service(&config)?;
    let daemon = Daemon::start(&config, store, actions)?;

    let router = daemon.router();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    daemon.shutdown().await;
    Ok(())
}
