//! In-process job store.
//!
//! Records live in a `HashMap` behind a `tokio::sync::RwLock`, so every
//! check-then-act sequence on a job runs under one write guard. With a
//! TTL configured, expiry is applied lazily on access and by
//! [`JobStore::purge_expired`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_core::job::Job;
use mediagraph_core::naming::generate_job_id;
use mediagraph_core::status::JobStatus;
use mediagraph_core::types::JobId;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::JobStore;

struct Entry {
    job: Job,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Job store kept entirely in process memory.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Entry>>,
    ttl: Option<Duration>,
}

impl MemoryJobStore {
    /// Create a store whose records never expire.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Create a store whose records expire `ttl` after their last update.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.jobs
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn expiry(&self) -> Option<Instant> {
        self.ttl.map(|ttl| Instant::now() + ttl)
    }

    /// Apply `f` to a live job, refreshing its TTL when it reports a change.
    async fn mutate<F>(&self, id: &str, f: F) -> Option<bool>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut jobs = self.jobs.write().await;
        let now = Instant::now();
        if jobs.get(id).is_some_and(|entry| entry.is_expired(now)) {
            jobs.remove(id);
            return None;
        }
        let expires_at = self.expiry();
        let entry = jobs.get_mut(id)?;
        let changed = f(&mut entry.job);
        if changed {
            entry.expires_at = expires_at;
        }
        Some(changed)
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_type: &str, payload: Value) -> CoreResult<JobId> {
        let id = generate_job_id(job_type);
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(CoreError::Collision { id });
        }
        jobs.insert(
            id.clone(),
            Entry {
                job: Job::new(id.clone(), job_type, payload),
                expires_at: self.expiry(),
            },
        );
        tracing::debug!(job_id = %id, job_type, "Created job");
        Ok(id)
    }

    async fn get(&self, id: &str) -> CoreResult<Job> {
        let now = Instant::now();
        let jobs = self.jobs.read().await;
        match jobs.get(id) {
            Some(entry) if !entry.is_expired(now) => Ok(entry.job.clone()),
            _ => Err(CoreError::not_found(id)),
        }
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| job.apply_status(status, message))
            .await
            .unwrap_or(false))
    }

    async fn set_progress(&self, id: &str, percent: f64) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| job.apply_progress(percent))
            .await
            .unwrap_or(false))
    }

    async fn append_result(&self, id: &str, value: Value) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| job.push_result(value))
            .await
            .unwrap_or(false))
    }

    async fn cancel(&self, id: &str) -> CoreResult<bool> {
        self.mutate(id, |job| job.request_cancel())
            .await
            .ok_or_else(|| CoreError::not_found(id))
    }

    async fn delete(&self, id: &str) -> CoreResult<bool> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }

    async fn attach_execution(&self, id: &str, handle: &str) -> CoreResult<bool> {
        Ok(self
            .mutate(id, |job| {
                job.execution_handle = Some(handle.to_string());
                true
            })
            .await
            .unwrap_or(false))
    }

    async fn purge_expired(&self) -> CoreResult<u64> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.is_expired(now));
        Ok((before - jobs.len()) as u64)
    }

    async fn health_check(&self) -> CoreResult<()> {
        Ok(())
    }
}
