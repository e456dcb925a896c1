use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bg_core::services::{config_loader, SlotManager};
use bg_server::auth::ApiKeys;
use bg_server::{build_router, sweeper, AppState};
use color_eyre::eyre::WrapErr;

const DEFAULT_CONFIG: &str = "bluegreen.yaml";

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    // --config <path>, then BG_CONFIG, then ./bluegreen.yaml
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("BG_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = config_loader::load(&config_path)
        .wrap_err_with(|| format!("loading {}", config_path.display()))?;
    let _guard = setup_logging(config.log_dir.as_deref());

    let manager = Arc::new(SlotManager::from_config(config).wrap_err("opening state stores")?);
    manager
        .seed_projects()
        .await
        .wrap_err("seeding project registry")?;

    let listen = manager.config().listen.clone();
    let sweep_every = Duration::from_secs(manager.config().sweep_interval_secs);
    let keys = ApiKeys::from_config(&manager.config().api_keys);
    if keys.is_empty() {
        tracing::warn!("no API keys configured; every tool call will be rejected");
    }

    let sweeper = sweeper::spawn(manager.clone(), sweep_every);
    let app = build_router(AppState::new(manager, keys));

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .wrap_err_with(|| format!("binding {listen}"))?;
    tracing::info!(%listen, config = %config_path.display(), "bg-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("bg-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}

/// Daily-rolling file in `log_dir` when configured, stdout otherwise.
/// Returns the guard that must be held alive for the duration of the program.
fn setup_logging(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "bg-server.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_env_filter(filter())
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
            None
        }
    }
}
