use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Semaphore;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use asset_daemon::config::{Args, DaemonConfig};
use asset_daemon::jobs::{JobContext, JobExecutor};
use asset_daemon::remote::{HttpPools, Marketplace};
use asset_daemon::server::{self, AppState};
use asset_daemon::tasks::{TaskRegistry, spawn_bus_loop};
use asset_daemon::upload::BlenderPacker;
use asset_daemon::watchdog::{Liveness, Shutdown, spawn_idle_watchdog};

/// Stdout logging, plus `<log_dir>/asset-daemon.log` when configured. The
/// returned guard must live until exit to flush the file writer.
fn init_tracing(config: &DaemonConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).with_filter(filter());

    let Some(dir) = &config.log_dir else {
        tracing_subscriber::registry().with(stdout).init();
        return Ok(None);
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "asset-daemon.log"));
    let file = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
        .with_filter(filter());
    tracing_subscriber::registry().with(stdout).with(file).init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::from_args(Args::parse())?;
    let log_guard = init_tracing(&config)?;

    tracing::info!(
        version = %config.version,
        port = config.port,
        server = %config.server_url,
        system_id = %config.system_id,
        "Asset daemon starting"
    );

    // ── Task engine ──────────────────────────────────────────────────────
    let registry = TaskRegistry::new();
    let (bus, _bus_handle) = spawn_bus_loop(registry);

    let pools = HttpPools::new(&config.http, &config.user_agent())?;
    let marketplace = Marketplace::new(pools, config.server_url.clone(), config.system_id.clone());
    let executor = JobExecutor::new(JobContext {
        marketplace,
        bus,
        thumbnail_permits: Arc::new(Semaphore::new(config.thumbnail_concurrency)),
        packer: Arc::new(BlenderPacker),
    });

    // ── Watchdog ─────────────────────────────────────────────────────────
    let liveness = Liveness::new();
    let shutdown = Shutdown::new();
    let _watchdog = spawn_idle_watchdog(
        liveness.clone(),
        shutdown.clone(),
        config.idle_timeout,
        config.watchdog_period,
    );

    // ── HTTP surface ─────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "Listening");

    let state = AppState {
        executor,
        liveness,
        shutdown: shutdown.clone(),
        config: Arc::new(config),
    };
    server::serve(listener, state).await?;

    if shutdown.is_forced() {
        tracing::warn!("Exiting with tasks still in flight");
        drop(log_guard);
        std::process::exit(0);
    }
    tracing::info!("Asset daemon stopped");
    Ok(())
}
