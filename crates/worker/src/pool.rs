//! Per-type worker pool.
//!
//! One consumer loop per job type. For each dequeued job id the loop waits
//! for an executor slot, claims the job (`PENDING -> RUNNING`), and hands
//! the handler to the bounded executor. A job found cancelled at claim time
//! is skipped without invoking the handler. Handler outcomes are written
//! back with single-attempt semantics.

use std::sync::Arc;

use mediagraph_core::error::CoreError;
use mediagraph_core::execution::{ExecutionEngine, NativeState};
use mediagraph_core::job::{Job, PROGRESS_COMPLETE};
use mediagraph_core::job_events::{
    MSG_TYPE_JOB_CANCELLED, MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED, MSG_TYPE_JOB_PROGRESS,
    MSG_TYPE_JOB_STARTED,
};
use mediagraph_core::status::JobStatus;
use mediagraph_core::types::JobId;
use mediagraph_db::JobStore;
use mediagraph_events::{EventBus, JobEvent};
use serde_json::{json, Value};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cancel::InFlightJobs;
use crate::executor::BoundedExecutor;
use crate::handler::{HandlerError, HandlerUpdate, JobContext, JobHandler};

/// Message recorded on a job whose handler panicked.
pub const HANDLER_PANICKED: &str = "handler panicked";

/// Consumer for one job type.
///
/// Cheap to clone; every clone shares the same store, executor and
/// registries.
#[derive(Clone)]
pub struct WorkerPool {
    job_type: String,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    executor: Arc<BoundedExecutor>,
    in_flight: Arc<InFlightJobs>,
    engine: Option<Arc<dyn ExecutionEngine>>,
    events: Arc<EventBus>,
}

impl WorkerPool {
    pub fn new(
        job_type: impl Into<String>,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        executor: Arc<BoundedExecutor>,
        in_flight: Arc<InFlightJobs>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            store,
            handler,
            executor,
            in_flight,
            engine: None,
            events,
        }
    }

    /// Report execution state to `engine` and attach its handle to each job.
    pub fn with_engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Consume `queue` until `cancel` fires or the dispatcher goes away,
    /// then wait for the jobs already handed to the executor.
    pub async fn run(self, mut queue: mpsc::UnboundedReceiver<JobId>, cancel: CancellationToken) {
        let tracker = TaskTracker::new();
        tracing::info!(
            job_type = %self.job_type,
            slots = self.executor.slots(),
            "Worker pool started",
        );

        loop {
            let job_id = tokio::select! {
                _ = cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Some(job_id) => job_id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.executor.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::error!(job_type = %self.job_type, error = %e, "Executor unavailable");
                        break;
                    }
                },
            };

            if let Some(job) = self.claim(&job_id).await {
                let pool = self.clone();
                tracker.spawn(async move { pool.execute(job, permit).await });
            }
        }

        tracing::info!(
            job_type = %self.job_type,
            in_flight = tracker.len(),
            "Worker pool shutting down",
        );
        tracker.close();
        tracker.wait().await;
    }

    /// Take ownership of a queued job. Returns `None` if it must not run.
    async fn claim(&self, job_id: &str) -> Option<Job> {
        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(CoreError::NotFound { .. }) => {
                tracing::warn!(job_id, job_type = %self.job_type, "Queued job vanished before claim");
                return None;
            }
            Err(e) => {
                tracing::error!(job_id, job_type = %self.job_type, error = %e, "Failed to load queued job");
                return None;
            }
        };

        if job.cancelled || job.status == JobStatus::Cancelled {
            // Already CANCELLED in the store; this only fires for a flag
            // set without the status.
            if self.write_status(job_id, JobStatus::Cancelled, None).await {
                self.publish(MSG_TYPE_JOB_CANCELLED, job_id, Value::Null);
            }
            tracing::info!(job_id, job_type = %self.job_type, "Skipping cancelled job");
            return None;
        }
        if job.is_terminal() {
            tracing::debug!(job_id, status = %job.status, "Skipping finished job");
            return None;
        }

        if !self.write_status(job_id, JobStatus::Running, None).await {
            // Lost the race against a cancel.
            tracing::info!(job_id, job_type = %self.job_type, "Job cancelled during claim");
            return None;
        }
        self.write_progress(job_id, 0.0).await;

        let mut job = job;
        job.status = JobStatus::Running;
        if let Some(engine) = &self.engine {
            match engine.open(job_id).await {
                Ok(handle) => {
                    if let Err(e) = engine.report(&handle, NativeState::Started).await {
                        tracing::warn!(job_id, error = %e, "Engine report failed");
                    }
                    if let Err(e) = self.store.attach_execution(job_id, &handle).await {
                        tracing::warn!(job_id, error = %e, "Failed to attach execution handle");
                    }
                    job.execution_handle = Some(handle);
                }
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "Failed to open execution");
                }
            }
        }

        tracing::info!(job_id, job_type = %self.job_type, "Job claimed");
        self.publish(MSG_TYPE_JOB_STARTED, job_id, Value::Null);
        Some(job)
    }

    /// Run the handler for a claimed job and record its outcome.
    async fn execute(&self, job: Job, permit: OwnedSemaphorePermit) {
        let token = self.in_flight.register(&job.id).await;
        let (ctx, mut updates) = JobContext::new(job.id.clone(), job.job_type.clone(), token);
        let handler = self.handler.clone();
        let payload = job.payload.clone();

        let mut task = self.executor.spawn(permit, move || handler.handle(payload, &ctx));

        let outcome = loop {
            tokio::select! {
                Some(update) = updates.recv() => self.apply_update(&job, update).await,
                outcome = &mut task => break outcome,
            }
        };
        while let Ok(update) = updates.try_recv() {
            self.apply_update(&job, update).await;
        }
        self.in_flight.remove(&job.id).await;

        self.finish(&job, outcome).await;
    }

    async fn apply_update(&self, job: &Job, update: HandlerUpdate) {
        match update {
            HandlerUpdate::Progress(percent) => {
                // Only progress the store accepted reaches the engine.
                if self.write_progress(&job.id, percent).await {
                    self.report_native(job, NativeState::Progress { progress: Some(percent) })
                        .await;
                    tracing::debug!(job_id = %job.id, progress = percent, "Job progress");
                    self.publish(MSG_TYPE_JOB_PROGRESS, &job.id, json!({ "progress": percent }));
                }
            }
            HandlerUpdate::Partial(value) => match self.store.append_result(&job.id, value).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(job_id = %job.id, "Partial result discarded"),
                Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to append partial result"),
            },
        }
    }

    async fn finish(&self, job: &Job, outcome: Result<Result<Value, HandlerError>, JoinError>) {
        let job_id = job.id.as_str();
        match outcome {
            Ok(Ok(value)) => {
                self.report_native(job, NativeState::Success { result: value.clone() })
                    .await;
                if let Err(e) = self.store.append_result(job_id, value).await {
                    tracing::error!(job_id, error = %e, "Failed to store result");
                }
                self.write_progress(job_id, PROGRESS_COMPLETE).await;
                if self.settle(job_id, JobStatus::Completed, None).await {
                    tracing::info!(job_id, job_type = %self.job_type, "Job completed");
                    self.publish(MSG_TYPE_JOB_COMPLETED, job_id, Value::Null);
                } else {
                    tracing::info!(job_id, "Job already settled elsewhere, result discarded");
                }
            }
            Ok(Err(e)) => self.fail(job, &e.to_string()).await,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Handler task aborted");
                self.fail(job, HANDLER_PANICKED).await;
            }
        }
    }

    async fn fail(&self, job: &Job, message: &str) {
        let job_id = job.id.as_str();
        self.report_native(job, NativeState::Failure { error: message.to_string() })
            .await;
        if self.settle(job_id, JobStatus::Failed, Some(message)).await {
            tracing::warn!(job_id, job_type = %self.job_type, error = message, "Job failed");
            self.publish(MSG_TYPE_JOB_FAILED, job_id, json!({ "error": message }));
        } else {
            tracing::info!(job_id, error = message, "Job already settled elsewhere, failure discarded");
        }
    }

    /// Engine state is written before the store so it is never behind it.
    async fn report_native(&self, job: &Job, state: NativeState) {
        let (Some(engine), Some(handle)) = (&self.engine, job.execution_handle.as_deref()) else {
            return;
        };
        if let Err(e) = engine.report(handle, state).await {
            tracing::warn!(job_id = %job.id, handle, error = %e, "Engine report failed");
        }
    }

    /// Write the terminal `status` for a finished handler.
    ///
    /// A read may have already folded the engine's final state into the
    /// record, in which case the write is rejected but the job did settle
    /// as `status`. Returns `false` only if the job ended some other way.
    async fn settle(&self, job_id: &str, status: JobStatus, message: Option<&str>) -> bool {
        if self.write_status(job_id, status, message).await {
            return true;
        }
        match self.store.get(job_id).await {
            Ok(job) => job.status == status,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to re-read finished job");
                false
            }
        }
    }

    async fn write_status(&self, job_id: &str, status: JobStatus, message: Option<&str>) -> bool {
        self.store
            .set_status(job_id, status, message)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(job_id, status = %status, error = %e, "Failed to write status");
                false
            })
    }

    async fn write_progress(&self, job_id: &str, percent: f64) -> bool {
        self.store
            .set_progress(job_id, percent)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(job_id, error = %e, "Failed to write progress");
                false
            })
    }

    fn publish(&self, event_type: &str, job_id: &str, payload: Value) {
        let event = JobEvent::new(event_type, job_id, self.job_type.clone());
        let event = if payload.is_null() {
            event
        } else {
            event.with_payload(payload)
        };
        self.events.publish(event);
    }
}
