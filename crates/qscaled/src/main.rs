//! qscaled: the queue-depth capacity controller daemon.
//!
//! Runs the scaling loop and the instance pool loop against the backend
//! selected in the config, and serves read-only status over HTTP.
//!
//! # Usage
//!
//! ```text
//! qscaled run --config /etc/qscale/qscale.toml --listen 0.0.0.0:9090
//! qscaled check --config /etc/qscale/qscale.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use qscale_autoscale::Controller;
use qscale_core::ControllerConfig;

#[derive(Parser)]
#[command(name = "qscaled", about = "Queue-depth-driven capacity controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller loops and the status server.
    Run {
        /// Path to the TOML config file.
        #[arg(long, default_value = "qscale.toml")]
        config: PathBuf,

        /// Address for the status server.
        #[arg(long, default_value = "0.0.0.0:9090")]
        listen: SocketAddr,

        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
    /// Validate a config file and exit.
    Check {
        #[arg(long, default_value = "qscale.toml")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,qscaled=debug,qscale=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            listen,
            log_format,
        } => {
            init_tracing(log_format);
            run(config, listen).await
        }
        Command::Check { config } => check(config),
    }
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let (config, settings) = ControllerConfig::load(&path)
        .with_context(|| format!("invalid config {}", path.display()))?;

    println!("{}: ok", path.display());
    println!(
        "  queue {} -> service {} (tasks {}..{}), pool {} (instances {}..{})",
        settings.queue_id,
        settings.service_id,
        settings.task_bounds.min,
        settings.task_bounds.max,
        settings.pool_id,
        settings.instances.bounds.min,
        settings.instances.bounds.max,
    );
    println!(
        "  sample every {:?}, reconcile every {:?}, cooldown {:?}, {} step(s), backend {:?}",
        settings.sample_interval,
        settings.reconcile_interval,
        settings.cooldown,
        settings.step_table.steps().len(),
        config.backend,
    );
    Ok(())
}

async fn run(path: PathBuf, listen: SocketAddr) -> anyhow::Result<()> {
    info!(config = %path.display(), "qscaled starting");

    let (config, settings) = ControllerConfig::load(&path)
        .with_context(|| format!("invalid config {}", path.display()))?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    // ── Backends and control loops ─────────────────────────────

    let backends = qscaled::build_backends(&config.backend);
    info!(backend = ?config.backend, "backend initialized");

    let controller = Controller::start(&settings, backends);

    // ── Status server ──────────────────────────────────────────

    let router = qscaled::build_router(controller.status());
    info!(addr = %listen, "status server listening");

    // Graceful shutdown on Ctrl-C.
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    controller.stop().await;
    served?;

    info!("qscaled stopped");
    Ok(())
}
