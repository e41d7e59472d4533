//! Distributed job store: one expiring JSON record per job.
//!
//! Records are written through a [`RecordStore`] under `<prefix><job_id>`
//! and every write refreshes the TTL. When an [`ExecutionEngine`] is
//! attached, reads fold the engine's native state into the record and
//! write the merged record back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_core::execution::ExecutionEngine;
use mediagraph_core::job::Job;
use mediagraph_core::naming::{generate_job_id, record_key};
use mediagraph_core::projector::merge_native;
use mediagraph_core::status::JobStatus;
use mediagraph_core::types::JobId;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::record::{JobRecord, RecordStore};
use crate::store::JobStore;

pub const DEFAULT_KEY_PREFIX: &str = "media_graph_task:";
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

pub struct TtlJobStore {
    records: Arc<dyn RecordStore>,
    prefix: String,
    ttl: Duration,
    engine: Option<Arc<dyn ExecutionEngine>>,
    /// Serialises read-modify-write sequences issued by this process.
    write_lock: Mutex<()>,
}

impl TtlJobStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl: DEFAULT_TTL,
            engine: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Reconcile reads against `engine`.
    pub fn with_engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, id: &str) -> String {
        record_key(&self.prefix, id)
    }

    async fn load(&self, id: &str) -> CoreResult<Option<Job>> {
        match self.records.get(&self.key(id)).await? {
            Some(raw) => Ok(Some(JobRecord::from_json(&raw)?.into())),
            None => Ok(None),
        }
    }

    async fn save(&self, job: &Job) -> CoreResult<()> {
        let raw = JobRecord::from(job).to_json()?;
        self.records.set_ex(&self.key(&job.id), &raw, self.ttl).await
    }

    /// Load, apply `f`, and write back only if `f` reports a change.
    /// `None` when the record does not exist.
    async fn mutate<F>(&self, id: &str, f: F) -> CoreResult<Option<bool>>
    where
        F: FnOnce(&mut Job) -> bool + Send,
    {
        let _guard = self.write_lock.lock().await;
        let Some(mut job) = self.load(id).await? else {
            return Ok(None);
        };
        let changed = f(&mut job);
        if changed {
            self.save(&job).await?;
        }
        Ok(Some(changed))
    }

    /// Fold the engine's view of the job into `job`. Engine failures leave
    /// the stored record as is.
    async fn reconcile(&self, job: &mut Job) -> bool {
        let (Some(engine), Some(handle)) = (&self.engine, job.execution_handle.clone()) else {
            return false;
        };
        match engine.state(&handle).await {
            Ok(Some(native)) => merge_native(job, &native),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(job_id = %job.id, handle, error = %e, "Engine state lookup failed");
                false
            }
        }
    }
}

#[async_trait]
impl JobStore for TtlJobStore {
    async fn create(&self, job_type: &str, payload: Value) -> CoreResult<JobId> {
        let id = generate_job_id(job_type);
        let _guard = self.write_lock.lock().await;
        if self.records.get(&self.key(&id)).await?.is_some() {
            return Err(CoreError::Collision { id });
        }
        self.save(&Job::new(id.clone(), job_type, payload)).await?;
        tracing::debug!(job_id = %id, job_type, "Created job record");
        Ok(id)
    }

    async fn get(&self, id: &str) -> CoreResult<Job> {
        let _guard = self.write_lock.lock().await;
        let mut job = self
            .load(id)
            .await?
            .ok_or_else(|| CoreError::not_found(id))?;
        if self.reconcile(&mut job).await {
            tracing::debug!(job_id = %id, status = %job.status, "Reconciled with engine");
            self.save(&job).await?;
        }
        Ok(job)
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| job.apply_status(status, message))
            .await?
            .unwrap_or(false))
    }

    async fn set_progress(&self, id: &str, percent: f64) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| job.apply_progress(percent))
            .await?
            .unwrap_or(false))
    }

    async fn append_result(&self, id: &str, value: Value) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| job.push_result(value))
            .await?
            .unwrap_or(false))
    }

    async fn cancel(&self, id: &str) -> CoreResult<bool> {
        self.mutate(id, |job| job.request_cancel())
            .await?
            .ok_or_else(|| CoreError::not_found(id))
    }

    async fn delete(&self, id: &str) -> CoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        self.records.del(&self.key(id)).await
    }

    async fn attach_execution(&self, id: &str, handle: &str) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| {
                job.execution_handle = Some(handle.to_string());
                true
            })
            .await?
            .unwrap_or(false))
    }

    async fn purge_expired(&self) -> CoreResult<u64> {
        self.records.purge_expired().await
    }

    async fn health_check(&self) -> CoreResult<()> {
        self.records.ping().await
    }
}
