use async_trait::async_trait;
use mediagraph_core::error::CoreResult;
use mediagraph_core::job::Job;
use mediagraph_core::status::JobStatus;
use mediagraph_core::types::JobId;
use serde_json::Value;

/// Keyed state for every job.
///
/// Mutators addressed at an unknown id are silently ignored and report
/// `Ok(false)`; some callers are fire-and-forget. They also report
/// `Ok(false)` when the lifecycle rules on [`Job`] reject the change.
/// Only store failures surface as errors.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job and return its fresh id.
    ///
    /// Fails with `Collision` if the generated id is already taken.
    async fn create(&self, job_type: &str, payload: Value) -> CoreResult<JobId>;

    /// Fetch a snapshot of the job, or `NotFound`.
    async fn get(&self, id: &str) -> CoreResult<Job>;

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> CoreResult<bool>;

    /// Record progress as a percentage in `0..=100`.
    async fn set_progress(&self, id: &str, percent: f64) -> CoreResult<bool>;

    async fn append_result(&self, id: &str, value: Value) -> CoreResult<bool>;

    /// Set the cancelled flag and move the job to `Cancelled`.
    ///
    /// Returns `false` if the job already finished, `NotFound` if unknown.
    async fn cancel(&self, id: &str) -> CoreResult<bool>;

    /// Remove the record. Returns `true` if something was removed.
    async fn delete(&self, id: &str) -> CoreResult<bool>;

    /// Remember the execution-engine handle running this job.
    async fn attach_execution(&self, id: &str, handle: &str) -> CoreResult<bool>;

    /// Drop records whose TTL elapsed. Returns the number removed.
    async fn purge_expired(&self) -> CoreResult<u64>;

    /// Liveness check for the backing store.
    async fn health_check(&self) -> CoreResult<()>;
}
