use std::sync::Arc;

use anyhow::Context;
use mediagraph_core::execution::ExecutionEngine;
use mediagraph_worker::bootstrap::open_store;
use mediagraph_worker::engine::LocalExecutionEngine;
use mediagraph_worker::handlers::builtin_registry;
use mediagraph_worker::{Orchestrator, WorkerConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediagraph_worker=debug,mediagraph_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        backend = ?config.store_backend,
        retention = ?config.retention,
        default_concurrency = config.default_concurrency,
        "Worker starting",
    );

    let engine: Arc<dyn ExecutionEngine> = Arc::new(LocalExecutionEngine::new());
    let store = open_store(&config, engine.clone())
        .await
        .context("Failed to open job store")?;

    let orchestrator = Orchestrator::start(config, store, builtin_registry(), Some(engine))
        .await
        .context("Failed to start orchestrator")?;

    // Mirror lifecycle events into the log.
    let mut events = orchestrator.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(
                    event_type = %event.event_type,
                    job_id = %event.job_id,
                    job_type = %event.job_type,
                    "Job event",
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    shutdown_signal().await?;

    orchestrator.shutdown().await;
    event_log.abort();
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, starting graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Received Ctrl-C, starting graceful shutdown");
    }

    Ok(())
}
