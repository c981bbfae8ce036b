//! Acquisition daemon entry point.
//!
//! Wires the configuration into one worker task per serial link plus the
//! disabled-link supervisor, then waits for a termination signal (or the
//! `stop_app` retry policy) and unwinds everything within a bounded grace
//! period.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tilt_collector::config::AppConfig;
use tilt_collector::delivery::DeliveryQueue;
use tilt_collector::frame::FrameDecoder;
use tilt_collector::link::registry::LinkRegistry;
use tilt_collector::link::supervisor::LinkSupervisor;
use tilt_collector::link::LinkWorker;
use tilt_collector::sink::ReadingPipeline;
use tilt_collector::storage::TsvStore;

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// How long workers get to unwind after cancellation before being aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tilt_collector=debug".into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    // Journald is only there when running under systemd; fall back to
    // stderr-only logging otherwise.
    match tracing_journald::layer() {
        Ok(journald) => registry.with(journald).init(),
        Err(_) => registry.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load(&config_path)?;

    info!(
        config = %config_path.display(),
        links = config.links.len(),
        "tilt collector starting"
    );
    if config.links.is_empty() {
        warn!("no links configured, nothing to acquire");
    }

    let delivery = Arc::new(DeliveryQueue::open(config.delivery.clone()).await?);
    // Batches left over from a previous run go out first.
    delivery.drain_spool().await;

    let sink = Arc::new(ReadingPipeline::new(
        TsvStore::new(config.storage.base_dir.clone()),
        delivery,
        config.keys.clone(),
    ));
    let registry = Arc::new(LinkRegistry::new());
    let decoder = FrameDecoder::new(config.frame.clone());
    let shutdown = CancellationToken::new();

    let mut tasks = JoinSet::new();
    for link in config.links.clone() {
        let worker = LinkWorker::new(
            link,
            config.retry.clone(),
            decoder.clone(),
            sink.clone(),
            registry.clone(),
            shutdown.clone(),
        );
        tasks.spawn(worker.run());
    }

    if config.supervisor.enabled {
        let supervisor = LinkSupervisor::new(
            config.supervisor.clone(),
            config.retry.clone(),
            decoder.clone(),
            sink.clone(),
            registry.clone(),
            shutdown.clone(),
        );
        tasks.spawn(supervisor.run());
    } else {
        info!("link supervisor disabled, disabled links stay down");
    }

    wait_for_shutdown(&shutdown).await?;
    shutdown.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("shutdown grace period elapsed, aborting remaining tasks");
        tasks.shutdown().await;
    }

    info!("tilt collector stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: &CancellationToken) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = sigterm.recv() => info!("termination signal received, shutting down"),
        _ = shutdown.cancelled() => info!("stop requested by link policy, shutting down"),
    }
    Ok(())
}
