use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use neurokey_daemon::{
    keys::LoggingKeySink,
    load_config,
    server::{self, AppState},
    SessionController, SessionState, SyntheticSourceFactory, Telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "neurokey_daemon=info,eeg_sensor=info,tower_http=info";

/// EEG lateralization to key press daemon
#[derive(Parser, Debug)]
#[command(name = "neurokey", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to listen on, overrides the configuration file
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Log filter, e.g. "debug" or "neurokey_daemon=trace"
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("neurokey starting...");

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    // --- Centralized State ---
    let session = Arc::new(SessionState::new(config.settings.clone()));
    let telemetry = Telemetry::default();
    let shutdown = CancellationToken::new();

    let controller = SessionController::new(
        &config,
        session.clone(),
        telemetry.clone(),
        Arc::new(SyntheticSourceFactory::new(config.synthetic.prefill_seconds)),
        Arc::new(LoggingKeySink),
    );
    let (controller_handle, controller_task) = controller.spawn(shutdown.clone());

    let state = AppState {
        session,
        telemetry,
        controller: controller_handle,
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    let server_task = tokio::spawn(server::serve(listener, state));

    // --- Graceful Shutdown ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received. Stopping services...");
    shutdown.cancel();

    controller_task.await?;
    server_task.await??;

    tracing::info!("neurokey stopped gracefully.");
    Ok(())
}
