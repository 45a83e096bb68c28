//! Application orchestrator — wires watcher, worker, and transport together.

use std::sync::Arc;
use std::time::Duration;

use ferry_config::RelayConfig;
use ferry_transfer::{SystemRunner, create_service};
use ferry_watcher::{FileWatcher, WatchError};
use ferry_worker::{RelayEvent, RelayWorker};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EnvCredentials;

const POLL_FALLBACK_INTERVAL: Duration = Duration::from_secs(2);

/// Runs the relay until shutdown is requested.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    let service = create_service(
        Arc::clone(&config),
        Arc::new(EnvCredentials),
        Arc::new(SystemRunner),
    )?;

    // Startup diagnostic only: a down destination still gets retried per
    // file once transfers begin.
    if service.test_connection().await {
        tracing::info!(method = service.method_name(), "destination reachable");
    } else {
        tracing::warn!(
            method = service.method_name(),
            "destination not reachable at startup, transfers will retry"
        );
    }

    let capacity = config.max_queue_size;
    let (watcher, events) = match FileWatcher::start(&config.watch_dir, capacity) {
        Ok(started) => started,
        Err(error @ WatchError::MissingDirectory(_)) => return Err(error.into()),
        Err(error) => {
            tracing::warn!(error = %error, "native watcher unavailable, falling back to polling");
            FileWatcher::start_polling(&config.watch_dir, capacity, POLL_FALLBACK_INTERVAL)?
        }
    };

    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    tokio::spawn(log_relay_events(relay_rx));

    let worker = Arc::new(RelayWorker::new(Arc::clone(&config), service).with_events(relay_tx));
    let worker_task = tokio::spawn(Arc::clone(&worker).run(events, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    cancel.cancel();
    worker_task.await?;

    // Dropping the watcher stops the notify backend.
    drop(watcher);
    Ok(())
}

/// Surfaces worker notifications in the daemon log. Per-transfer details are
/// already logged by the worker; this covers the queue-level signals.
async fn log_relay_events(mut events: mpsc::UnboundedReceiver<RelayEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::Queued(path) => {
                tracing::debug!(path = %path.display(), "queued");
            }
            RelayEvent::QueueFull(path) => {
                tracing::warn!(path = %path.display(), "detection dropped, queue full");
            }
            RelayEvent::TransferStarted(path) => {
                tracing::debug!(path = %path.display(), "transfer starting");
            }
            RelayEvent::TransferFinished(result) => {
                tracing::debug!(
                    file = %result.file_name,
                    success = result.success,
                    "transfer finished"
                );
            }
            RelayEvent::StaleEvicted(count) => {
                tracing::warn!(count, "evicted stale queue entries");
            }
        }
    }
}
