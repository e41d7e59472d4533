//! Persisted job record layout and the key/value seam it is stored through.

use std::time::Duration;

use async_trait::async_trait;
use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_core::job::Job;
use mediagraph_core::status::{JobStatus, StatusCode};
use mediagraph_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One JSON record per job, as written to the record store.
///
/// `status_code` is denormalised next to `status` so external readers of
/// the raw record do not need the projection table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub status_code: StatusCode,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub result: Vec<Value>,
    pub progress: f64,
    #[serde(default)]
    pub cancelled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub execution_handle: Option<String>,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            status: job.status,
            status_code: job.status.code(),
            message: job.message.clone(),
            data: job.payload.clone(),
            result: job.result.clone(),
            progress: job.progress,
            cancelled: job.cancelled,
            created_at: job.created_at,
            updated_at: job.updated_at,
            execution_handle: job.execution_handle.clone(),
        }
    }
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.job_id,
            job_type: record.job_type,
            status: record.status,
            message: record.message,
            payload: record.data,
            result: record.result,
            progress: record.progress,
            cancelled: record.cancelled,
            created_at: record.created_at,
            updated_at: record.updated_at,
            execution_handle: record.execution_handle,
        }
    }
}

impl JobRecord {
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self)
            .map_err(|e| CoreError::Internal(format!("Failed to encode job record: {e}")))
    }

    pub fn from_json(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| CoreError::Internal(format!("Corrupt job record: {e}")))
    }
}

/// Expiring key/value storage for serialized job records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Insert or overwrite `key`, expiring `ttl` from now.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()>;

    /// Remove `key`. Returns `true` if a live value was removed.
    async fn del(&self, key: &str) -> CoreResult<bool>;

    /// Drop every expired value. Returns the number removed.
    async fn purge_expired(&self) -> CoreResult<u64>;

    async fn ping(&self) -> CoreResult<()>;
}
