use std::sync::Arc;

use mediagraph_core::error::CoreResult;
use mediagraph_core::execution::ExecutionEngine;
use mediagraph_db::{JobStore, MemoryJobStore, SqliteRecordStore, TtlJobStore};

use crate::config::{StoreBackend, WorkerConfig};

/// Build the configured job store.
///
/// The SQLite backend reconciles reads against `engine`.
pub async fn open_store(
    config: &WorkerConfig,
    engine: Arc<dyn ExecutionEngine>,
) -> CoreResult<Arc<dyn JobStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::info!(ttl_secs = config.job_ttl.as_secs(), "Using in-memory job store");
            Ok(Arc::new(MemoryJobStore::with_ttl(config.job_ttl)))
        }
        StoreBackend::Sqlite => {
            let records = SqliteRecordStore::connect(&config.database_url).await?;
            tracing::info!(
                prefix = %config.key_prefix,
                ttl_secs = config.job_ttl.as_secs(),
                "Using SQLite job record store",
            );
            Ok(Arc::new(
                TtlJobStore::new(Arc::new(records))
                    .with_prefix(config.key_prefix.clone())
                    .with_ttl(config.job_ttl)
                    .with_engine(engine),
            ))
        }
    }
}
