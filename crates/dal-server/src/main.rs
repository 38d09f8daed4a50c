//! `dal-server` binary
//!
//! ```bash
//! # Orchestrator API with an embedded ledger
//! dal-server serve --bind 0.0.0.0:8000
//!
//! # Ledger service, then an orchestrator that uses it
//! dal-server ledger --bind 0.0.0.0:8100
//! dal-server serve --ledger-url http://localhost:8100
//!
//! # Settings from a file, overridden by DAL_* variables and flags
//! dal-server --config dal.toml serve
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use dal_coordination::MemoryLedger;
use dal_server::{create_ledger_router, create_router, ServerConfig, Services};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator API
    Serve {
        /// Listen address (overrides DAL_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Remote ledger service; an in-memory ledger is embedded when unset
        #[arg(long)]
        ledger_url: Option<String>,
    },

    /// Run a standalone ledger service
    Ledger {
        /// Listen address (overrides DAL_LEDGER_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Entries per sealed block
        #[arg(long)]
        block_size: Option<usize>,

        /// Seal pending entries at least this often
        #[arg(long)]
        block_interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dal_server=info,dal_coordination=info,tower_http=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Serve { bind, ledger_url } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if ledger_url.is_some() {
                config.ledger_url = ledger_url;
            }
            serve(config).await
        }
        Command::Ledger {
            bind,
            block_size,
            block_interval_ms,
        } => {
            if let Some(bind) = bind {
                config.ledger_bind = bind;
            }
            if let Some(block_size) = block_size {
                config.ledger_block_size = block_size;
            }
            if let Some(interval) = block_interval_ms {
                config.ledger_block_interval_ms = interval;
            }
            ledger(config).await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let services = Services::build(&config).context("Failed to connect to the ledger")?;
    let tasks = services.spawn_background(&config);

    info!(
        bind = %config.bind,
        ledger = config.ledger_url.as_deref().unwrap_or("embedded"),
        "Orchestrator starting"
    );
    let app = create_router(services.orchestrator.clone());
    let result = run(app, config.bind).await;

    for task in tasks {
        task.abort();
    }
    result
}

async fn ledger(config: ServerConfig) -> Result<()> {
    let ledger = MemoryLedger::with_block_size(config.ledger_block_size).shared();
    let producer = ledger.spawn_block_producer(config.block_interval());

    info!(
        bind = %config.ledger_bind,
        block_size = config.ledger_block_size,
        "Ledger service starting"
    );
    let result = run(create_ledger_router(ledger), config.ledger_bind).await;

    producer.abort();
    result
}

async fn run(app: Router, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
