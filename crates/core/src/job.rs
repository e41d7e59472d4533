//! Job record and its lifecycle rules.
//!
//! The mutation methods encode the state machine once so that every store
//! backend applies identical rules. Each returns `true` when the record
//! changed and `false` when the mutation was rejected.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::{JobStatus, StatusCode};
use crate::types::{JobId, Timestamp};

/// Upper bound for `progress`, expressed as a percentage.
pub const PROGRESS_COMPLETE: f64 = 100.0;

/// A tracked unit of submitted work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    /// Detail attached to the latest status change (e.g. a failure reason).
    pub message: Option<String>,
    pub payload: Value,
    pub result: Vec<Value>,
    pub progress: f64,
    pub cancelled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Handle issued by an external execution engine, if any.
    pub execution_handle: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: impl Into<JobId>, job_type: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            message: None,
            payload,
            result: Vec::new(),
            progress: 0.0,
            cancelled: false,
            created_at: now,
            updated_at: now,
            execution_handle: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn status_code(&self) -> StatusCode {
        self.status.code()
    }

    /// Move to `next` if the lifecycle graph allows it.
    pub fn apply_status(&mut self, next: JobStatus, message: Option<&str>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.message = message.map(str::to_owned);
        self.touch();
        true
    }

    /// Record progress as a percentage.
    ///
    /// Values are clamped to `0..=100`. Terminal jobs are frozen and a
    /// running job never moves backwards.
    pub fn apply_progress(&mut self, percent: f64) -> bool {
        if self.is_terminal() || percent.is_nan() {
            return false;
        }
        let percent = percent.clamp(0.0, PROGRESS_COMPLETE);
        if self.status == JobStatus::Running && percent < self.progress {
            return false;
        }
        self.progress = percent;
        self.touch();
        true
    }

    /// Append a (partial or final) result. Only running jobs accept results.
    pub fn push_result(&mut self, value: Value) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.result.push(value);
        self.touch();
        true
    }

    /// Flag the job as cancelled and move it to `Cancelled`.
    ///
    /// Returns `false` without mutating anything if the job already finished.
    pub fn request_cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.cancelled = true;
        self.status = JobStatus::Cancelled;
        self.message = None;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// What a caller sees when polling a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub status: JobStatus,
    pub code: StatusCode,
    pub message: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Value>>,
}

/// Response to a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelOutcome {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}
