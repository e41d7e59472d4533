//! Job cancellation.
//!
//! Cancelling marks the job in the store; that is the only thing workers
//! check before claiming. For jobs already running, the controller also
//! trips the job's in-flight token and revokes its execution handle. Both
//! are hints: nothing is preempted, and the worker discards whatever the
//! handler eventually returns.

use std::collections::HashMap;
use std::sync::Arc;

use mediagraph_core::error::CoreResult;
use mediagraph_core::execution::ExecutionEngine;
use mediagraph_core::job::CancelOutcome;
use mediagraph_core::job_events::MSG_TYPE_JOB_CANCELLED;
use mediagraph_core::types::JobId;
use mediagraph_db::JobStore;
use mediagraph_events::{EventBus, JobEvent};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Reason reported when cancelling a job that already finished.
pub const ALREADY_FINISHED: &str = "already finished";

// ---------------------------------------------------------------------------
// In-flight registry
// ---------------------------------------------------------------------------

/// Cancellation tokens of jobs whose handler is currently running.
#[derive(Default)]
pub struct InFlightJobs {
    tokens: RwLock<HashMap<JobId, CancellationToken>>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job and return the token its handler observes.
    pub async fn register(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .write()
            .await
            .insert(job_id.to_string(), token.clone());
        token
    }

    pub async fn remove(&self, job_id: &str) {
        self.tokens.write().await.remove(job_id);
    }

    /// Trip the token of a running job. Returns `false` if it is not running.
    pub async fn signal(&self, job_id: &str) -> bool {
        match self.tokens.read().await.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct CancellationController {
    store: Arc<dyn JobStore>,
    in_flight: Arc<InFlightJobs>,
    engine: Option<Arc<dyn ExecutionEngine>>,
    events: Arc<EventBus>,
}

impl CancellationController {
    pub fn new(
        store: Arc<dyn JobStore>,
        in_flight: Arc<InFlightJobs>,
        engine: Option<Arc<dyn ExecutionEngine>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            in_flight,
            engine,
            events,
        }
    }

    /// Cancel a job.
    ///
    /// Unknown ids are `NotFound`. A job that already reached a terminal
    /// status is left untouched and reported as rejected, which also makes
    /// repeated cancels harmless.
    pub async fn cancel(&self, job_id: &str) -> CoreResult<CancelOutcome> {
        if !self.store.cancel(job_id).await? {
            tracing::debug!(job_id, "Cancel rejected, job already finished");
            return Ok(CancelOutcome::rejected(ALREADY_FINISHED));
        }

        let was_running = self.in_flight.signal(job_id).await;

        let snapshot = match self.store.get(job_id).await {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Cancelled job could not be re-read");
                None
            }
        };

        if let (Some(engine), Some(handle)) = (
            &self.engine,
            snapshot.as_ref().and_then(|job| job.execution_handle.as_deref()),
        ) {
            if let Err(e) = engine.revoke(handle).await {
                tracing::warn!(job_id, handle, error = %e, "Execution revoke failed");
            }
        }

        let job_type = snapshot.map(|job| job.job_type).unwrap_or_default();
        tracing::info!(job_id, job_type = %job_type, was_running, "Job cancelled");
        self.events
            .publish(JobEvent::new(MSG_TYPE_JOB_CANCELLED, job_id, job_type));

        Ok(CancelOutcome::accepted())
    }
}
