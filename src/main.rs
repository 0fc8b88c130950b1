use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use tele_relay::config::{LoggingConfig, RelayConfig};
use tele_relay::control::{ControlSurface, poller};
use tele_relay::forwarding::ForwardingDispatcher;
use tele_relay::onboarding::OnboardingManager;
use tele_relay::relay::TelegramRelay;
use tele_relay::session::{GatewayAuthenticator, GatewayTransport, SessionManager};
use tele_relay::store::LibSqlBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let _ = dotenvy::dotenv();
    let config = RelayConfig::from_env().context("loading configuration")?;
    let _log_guard = init_logging(&config.logging)?;

    eprintln!("📨 Tele Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Gateway: {}", config.gateway.url);
    eprintln!("   Database: {}", config.database_path.display());
    eprintln!("   Logs: {}", config.logging.dir.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| format!("opening database at {}", config.database_path.display()))?,
    );

    // ── Relay identity ───────────────────────────────────────────────────
    let relay = Arc::new(
        TelegramRelay::connect(&config.bot)
            .await
            .context("connecting the relay bot")?,
    );

    // ── Sessions ─────────────────────────────────────────────────────────
    let dispatcher = Arc::new(ForwardingDispatcher::new(
        db.clone(),
        relay.clone(),
        config.dispatch.clone(),
    ));
    let transport = Arc::new(GatewayTransport::new(
        &config.gateway,
        config.session.shutdown_timeout,
    ));
    let sessions = Arc::new(SessionManager::new(
        transport,
        db.clone(),
        dispatcher,
        config.session.clone(),
    ));

    // ── Control surface ──────────────────────────────────────────────────
    let onboarding = Arc::new(OnboardingManager::new(
        Arc::new(GatewayAuthenticator::new(&config.gateway)),
        db.clone(),
        sessions.clone(),
    ));
    let surface = Arc::new(ControlSurface::new(
        config.owner_id,
        db.clone(),
        sessions.clone(),
        onboarding,
    ));

    let report = sessions
        .start_all_active()
        .await
        .context("loading active accounts")?;
    for (account_id, e) in &report.failed {
        warn!(account_id, error = %e, "Account did not start");
    }
    eprintln!(
        "   Sessions: {} started, {} failed\n",
        report.started.len(),
        report.failed.len()
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let control = tokio::spawn(poller::run(surface, relay, shutdown_rx));

    wait_for_signal().await?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = control.await {
        warn!(error = %e, "Control loop ended abnormally");
    }

    let stopped = sessions.stop_all().await;
    info!(stopped, "Shutdown complete");
    Ok(())
}

/// Console plus a daily-rotated file, keeping three files.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("creating log directory {}", config.dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("tele-relay")
        .filename_suffix("log")
        .max_log_files(3)
        .build(&config.dir)
        .context("creating log file appender")?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    Ok(guard)
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("listening for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")
}
