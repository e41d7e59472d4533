//! Periodic purge of expired job records and finished executions.
//!
//! Both store backends also hide expired records lazily; the sweeper keeps
//! them from accumulating. Finished executions are kept as long as a job
//! record so read-time reconciliation still finds them.

use std::sync::Arc;
use std::time::Duration;

use mediagraph_core::execution::ExecutionEngine;
use mediagraph_db::JobStore;
use tokio_util::sync::CancellationToken;

pub struct Sweeper {
    pub store: Arc<dyn JobStore>,
    pub engine: Option<Arc<dyn ExecutionEngine>>,
    /// How long a finished execution is kept.
    pub retention: Duration,
    pub interval: Duration,
}

impl Sweeper {
    /// Run the purge loop until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "Retention sweeper started",
        );

        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately; nothing has expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retention sweeper stopping");
                    break;
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        match self.store.purge_expired().await {
            Ok(0) => tracing::debug!("Retention sweep: nothing to purge"),
            Ok(purged) => tracing::info!(purged, "Retention sweep: purged expired jobs"),
            Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
        }

        if let Some(engine) = &self.engine {
            match engine.purge_finished(self.retention).await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Retention sweep: dropped finished executions"),
                Err(e) => tracing::error!(error = %e, "Execution purge failed"),
            }
        }
    }
}
