#![forbid(unsafe_code)]

//! `codecell` — session server binary.
//!
//! Bootstraps configuration, starts the HTTP boundary and the idle-session
//! reclamation task, and terminates every live kernel on orderly shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use codecell::config::GlobalConfig;
use codecell::http::{self, AppState};
use codecell::session::reclaimer;
use codecell::session::registry::SessionRegistry;
use codecell::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "codecell", about = "Remote code-execution session server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured sessions directory.
    #[arg(long)]
    sessions_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("codecell server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(dir) = args.sessions_dir {
        config.sessions_dir = dir;
    }
    let config = Arc::new(config);
    info!(sessions_dir = %config.sessions_dir.display(), "configuration loaded");

    // ── Build registry and background tasks ─────────────
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&config)));
    let ct = CancellationToken::new();

    let reclaimer_handle = reclaimer::spawn_reclamation_task(
        Arc::clone(&registry),
        config.reclaim.scan_interval(),
        ct.clone(),
    );
    info!("reclamation task started");

    // ── Start HTTP boundary ─────────────────────────────
    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        config: Arc::clone(&config),
    });

    let http_ct = ct.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(state, http_ct).await {
            error!(%err, "HTTP boundary failed");
        }
    });

    info!("codecell server ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Graceful shutdown: no kernel outlives the server ─
    registry.shutdown().await;

    let _ = tokio::join!(http_handle, reclaimer_handle);
    info!("codecell shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
