//! Pluggable job handlers.
//!
//! A [`JobHandler`] performs the domain computation for one job type. It
//! runs on the blocking thread pool and talks back to its worker only
//! through the [`JobContext`] it is given; it never touches the store.

use std::collections::HashMap;
use std::sync::Arc;

use mediagraph_core::job::PROGRESS_COMPLETE;
use mediagraph_core::types::JobId;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Error returned by a handler. Recorded on the job as `FAILED`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Update streamed from a running handler to its worker.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerUpdate {
    /// Progress as a percentage.
    Progress(f64),
    /// Partial result, appended while the job is running.
    Partial(Value),
}

/// Handle given to a running handler.
pub struct JobContext {
    job_id: JobId,
    job_type: String,
    updates: mpsc::UnboundedSender<HandlerUpdate>,
    cancel: CancellationToken,
}

impl JobContext {
    /// Create a context plus the receiving end of its update stream.
    pub fn new(
        job_id: impl Into<JobId>,
        job_type: impl Into<String>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<HandlerUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let ctx = Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            updates,
            cancel,
        };
        (ctx, rx)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Report that `done` of `total` sub-units are finished.
    pub fn report_progress(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (done as f64 / total as f64 * PROGRESS_COMPLETE).min(PROGRESS_COMPLETE);
        let _ = self.updates.send(HandlerUpdate::Progress(percent));
    }

    /// Publish a partial result before the handler returns.
    pub fn emit_partial(&self, value: Value) {
        let _ = self.updates.send(HandlerUpdate::Partial(value));
    }

    /// Whether a cancellation was requested for this job. Handlers may
    /// poll this to stop early; the result of a cancelled job is discarded
    /// either way.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Domain computation for one job type.
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, payload: Value, ctx: &JobContext) -> Result<Value, HandlerError>;
}

impl<F> JobHandler for F
where
    F: Fn(Value, &JobContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, payload: Value, ctx: &JobContext) -> Result<Value, HandlerError> {
        self(payload, ctx)
    }
}

/// A handler plus its optional slot count.
#[derive(Clone)]
pub struct Registration {
    pub handler: Arc<dyn JobHandler>,
    /// Overrides the configured concurrency for this type.
    pub concurrency: Option<usize>,
}

/// Job type -> handler table, fixed before the orchestrator starts.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, replacing any previous one.
    pub fn register(mut self, job_type: impl Into<String>, handler: impl JobHandler) -> Self {
        self.handlers.insert(
            job_type.into(),
            Registration {
                handler: Arc::new(handler),
                concurrency: None,
            },
        );
        self
    }

    /// Register `handler` with a fixed number of concurrent slots.
    pub fn register_with_concurrency(
        mut self,
        job_type: impl Into<String>,
        handler: impl JobHandler,
        slots: usize,
    ) -> Self {
        self.handlers.insert(
            job_type.into(),
            Registration {
                handler: Arc::new(handler),
                concurrency: Some(slots),
            },
        );
        self
    }

    pub fn get(&self, job_type: &str) -> Option<&Registration> {
        self.handlers.get(job_type)
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Registration)> {
        self.handlers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn context_streams_progress_and_partials() {
        let (ctx, mut rx) = JobContext::new("ECHO_1", "ECHO", CancellationToken::new());
        ctx.report_progress(1, 4);
        ctx.emit_partial(json!({"shot": 1}));
        ctx.report_progress(3, 0);

        assert_eq!(rx.try_recv().unwrap(), HandlerUpdate::Progress(25.0));
        assert_eq!(rx.try_recv().unwrap(), HandlerUpdate::Partial(json!({"shot": 1})));
        assert!(rx.try_recv().is_err(), "zero total must not report");
    }

    #[test]
    fn context_sees_cancellation() {
        let token = CancellationToken::new();
        let (ctx, _rx) = JobContext::new("ECHO_1", "ECHO", token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn closures_are_handlers() {
        let registry = HandlerRegistry::new()
            .register(
                "ECHO",
                |payload: Value, _ctx: &JobContext| -> Result<Value, HandlerError> { Ok(payload) },
            )
            .register_with_concurrency(
                "FAIL",
                |_: Value, _: &JobContext| -> Result<Value, HandlerError> {
                    Err(HandlerError::failed("bad input"))
                },
                3,
            );

        let (ctx, _rx) = JobContext::new("ECHO_1", "ECHO", CancellationToken::new());
        let echo = registry.get("ECHO").unwrap();
        assert_eq!(echo.handler.handle(json!({"v": 1}), &ctx).unwrap(), json!({"v": 1}));
        assert_eq!(echo.concurrency, None);

        let fail = registry.get("FAIL").unwrap();
        let err = fail.handler.handle(json!(null), &ctx).unwrap_err();
        assert_eq!(err.to_string(), "bad input");
        assert_eq!(fail.concurrency, Some(3));
        assert_eq!(registry.len(), 2);
    }
}
