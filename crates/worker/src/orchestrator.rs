//! Orchestrator facade.
//!
//! Owns the background tasks (dispatcher, one worker pool per registered
//! job type, retention sweeper) and exposes the caller-facing operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_core::execution::ExecutionEngine;
use mediagraph_core::job::{CancelOutcome, StatusView};
use mediagraph_core::job_events::MSG_TYPE_JOB_SUBMITTED;
use mediagraph_core::naming::validate_job_type;
use mediagraph_core::projector;
use mediagraph_core::types::JobId;
use mediagraph_db::JobStore;
use mediagraph_events::{EventBus, JobEvent};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cancel::{CancellationController, InFlightJobs};
use crate::config::{RetentionPolicy, WorkerConfig};
use crate::dispatcher::{DeadLetter, DeadLetterLog, Dispatcher, Submission};
use crate::executor::BoundedExecutor;
use crate::handler::HandlerRegistry;
use crate::pool::WorkerPool;
use crate::sweeper::Sweeper;

/// How long `shutdown` waits for each background task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn dispatcher_stopped() -> CoreError {
    CoreError::Internal("Dispatcher is not running".to_string())
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
    submissions: mpsc::UnboundedSender<Submission>,
    dead_letters: DeadLetterLog,
    canceller: CancellationController,
    retention: RetentionPolicy,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validate the registry, check the store and spawn every loop.
    pub async fn start(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
        engine: Option<Arc<dyn ExecutionEngine>>,
    ) -> CoreResult<Self> {
        if registry.is_empty() {
            return Err(CoreError::Validation(
                "At least one job handler must be registered".to_string(),
            ));
        }
        for job_type in registry.job_types() {
            validate_job_type(job_type)?;
        }
        store.health_check().await?;

        let events = Arc::new(EventBus::default());
        let in_flight = Arc::new(InFlightJobs::new());
        let dead_letters = DeadLetterLog::default();
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        let mut routes = HashMap::new();

        for (job_type, registration) in registry.iter() {
            let slots = registration
                .concurrency
                .unwrap_or_else(|| config.concurrency_for(job_type));
            let (tx, rx) = mpsc::unbounded_channel();
            routes.insert(job_type.to_string(), tx);

            let mut pool = WorkerPool::new(
                job_type,
                store.clone(),
                registration.handler.clone(),
                Arc::new(BoundedExecutor::new(slots)),
                in_flight.clone(),
                events.clone(),
            );
            if let Some(engine) = &engine {
                pool = pool.with_engine(engine.clone());
            }
            let handle = tokio::spawn(pool.run(rx, shutdown.child_token()));
            tasks.push((format!("pool:{job_type}"), handle));
        }

        let (submissions, submission_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(routes, dead_letters.clone(), events.clone());
        tasks.push((
            "dispatcher".to_string(),
            tokio::spawn(dispatcher.run(submission_rx, shutdown.child_token())),
        ));
        let sweeper = Sweeper {
            store: store.clone(),
            engine: engine.clone(),
            retention: config.job_ttl,
            interval: config.sweep_interval,
        };
        tasks.push((
            "sweeper".to_string(),
            tokio::spawn(sweeper.run(shutdown.child_token())),
        ));

        let canceller =
            CancellationController::new(store.clone(), in_flight, engine, events.clone());

        tracing::info!(
            job_types = registry.len(),
            retention = ?config.retention,
            "Orchestrator started",
        );

        Ok(Self {
            store,
            events,
            submissions,
            dead_letters,
            canceller,
            retention: config.retention,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Persist a new job and queue it for dispatch.
    pub async fn submit(&self, job_type: &str, payload: Value) -> CoreResult<JobId> {
        validate_job_type(job_type)?;
        if self.submissions.is_closed() {
            return Err(dispatcher_stopped());
        }
        let job_id = self.store.create(job_type, payload).await?;

        let queued = self.submissions.send(Submission {
            job_id: job_id.clone(),
            job_type: job_type.to_string(),
        });
        if queued.is_err() {
            // Nothing would ever route this record.
            if let Err(e) = self.store.delete(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove unroutable job");
            }
            return Err(dispatcher_stopped());
        }
        self.events
            .publish(JobEvent::new(MSG_TYPE_JOB_SUBMITTED, job_id.clone(), job_type));

        tracing::info!(job_id = %job_id, job_type, "Job submitted");
        Ok(job_id)
    }

    /// Current caller-facing status of a job.
    ///
    /// Under [`RetentionPolicy::ReadOnce`] the record is deleted once a
    /// terminal status has been returned.
    pub async fn get_status(&self, job_id: &str) -> CoreResult<StatusView> {
        let job = self.store.get(job_id).await?;
        let view = projector::render(&job);

        if self.retention == RetentionPolicy::ReadOnce && job.is_terminal() {
            if let Err(e) = self.store.delete(job_id).await {
                tracing::warn!(job_id, error = %e, "Failed to delete read-once job");
            }
        }
        Ok(view)
    }

    pub async fn cancel(&self, job_id: &str) -> CoreResult<CancelOutcome> {
        self.canceller.cancel(job_id).await
    }

    /// Receive lifecycle events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Submissions that no worker pool accepted.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().await.iter().cloned().collect()
    }

    pub async fn health_check(&self) -> CoreResult<()> {
        self.store.health_check().await
    }

    /// Stop every background task, waiting up to 5 s for each.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (name, handle) in tasks {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::debug!(task = %name, "Task stopped"),
                Ok(Err(e)) => tracing::error!(task = %name, error = %e, "Task ended abnormally"),
                Err(_) => tracing::warn!(task = %name, "Task did not stop in time"),
            }
        }
        tracing::info!("Orchestrator stopped");
    }
}
