//! kruised — the Kruise dashboard daemon.
//!
//! Single binary that assembles the dashboard backend:
//! - Cluster client (kube, or in-memory for demos)
//! - Rollout, watch and workload services
//! - REST API + SSE rollout feed
//!
//! # Usage
//!
//! ```text
//! kruised --config /etc/kruised/kruised.toml serve --port 8080
//! kruised --config kruised.toml check-config
//! ```

mod backend;
mod config;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kruise_api::{ApiState, build_router};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Backend, DaemonConfig, LogConfig, LogFormat};

/// How long open watch streams get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "kruised", about = "Kruise rollout dashboard daemon")]
struct Cli {
    /// Path to kruised.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the dashboard API.
    Serve {
        /// Port to listen on (overrides config and PORT).
        #[arg(long)]
        port: Option<u16>,

        /// Cluster backend (overrides config and KRUISE_BACKEND).
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },
    /// Print the effective configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port, backend } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(backend) = backend {
                config.cluster.backend = backend;
            }
            config.validate()?;
            init_tracing(&config.log)?;
            serve(config).await
        }
        Command::CheckConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&log.level)?,
    };
    match log.format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!(backend = ?config.cluster.backend, "Kruise dashboard daemon starting");

    // ── Initialize services ────────────────────────────────────

    let cluster = backend::connect(&config.cluster).await?;
    let state = ApiState::new(cluster, config.fan_out(), config.watch_settings());
    info!(
        heartbeat_secs = config.watch.heartbeat_secs,
        per_kind_timeout_secs = config.workloads.per_kind_timeout_secs,
        overall_timeout_secs = config.workloads.overall_timeout_secs,
        "services initialized"
    );

    // ── Start API server ───────────────────────────────────────

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    let mut server = tokio::spawn(server.into_future());

    tokio::select! {
        result = &mut server => result??,
        () = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(result) => result??,
                Err(_) => {
                    warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "open streams outlived the grace period");
                    server.abort();
                }
            }
        }
    }

    info!("Kruise dashboard daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
