//! Seam to an external execution engine.
//!
//! An execution engine runs (or tracks) a job on its own terms and keeps
//! its own notion of state per execution handle. The distributed store
//! backend merges that native state into the stored record at read time.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// State as reported by the execution engine itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NativeState {
    Pending,
    Started,
    /// In flight. `progress` is a percentage when the engine knows one.
    Progress { progress: Option<f64> },
    Success { result: Value },
    Failure { error: String },
    Revoked,
    Retry,
}

impl NativeState {
    /// Native name as the engine spells it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Progress { .. } => "PROGRESS",
            Self::Success { .. } => "SUCCESS",
            Self::Failure { .. } => "FAILURE",
            Self::Revoked => "REVOKED",
            Self::Retry => "RETRY",
        }
    }

    /// Success, failure and revocation are final for the engine.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Success { .. } | Self::Failure { .. } | Self::Revoked
        )
    }
}

impl fmt::Display for NativeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses payload-free native names. `SUCCESS` and `FAILURE` parse with an
/// empty payload; use the variants directly when the payload is known.
impl FromStr for NativeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "STARTED" => Ok(Self::Started),
            "PROGRESS" => Ok(Self::Progress { progress: None }),
            "SUCCESS" => Ok(Self::Success { result: Value::Null }),
            "FAILURE" => Ok(Self::Failure {
                error: String::new(),
            }),
            "REVOKED" => Ok(Self::Revoked),
            "RETRY" => Ok(Self::Retry),
            other => Err(format!("unknown native state: {other}")),
        }
    }
}

/// External execution engine tracked through opaque handles.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Register a new execution for `job_id` and return its handle.
    async fn open(&self, job_id: &str) -> CoreResult<String>;

    /// Record a state reported for `handle`.
    async fn report(&self, handle: &str, state: NativeState) -> CoreResult<()>;

    /// Current native state, or `None` if the handle is unknown.
    async fn state(&self, handle: &str) -> CoreResult<Option<NativeState>>;

    /// Best-effort request to terminate the execution.
    async fn revoke(&self, handle: &str) -> CoreResult<()>;

    /// Forget executions that reached a final state more than `older_than`
    /// ago. Returns the number dropped. Engines that expire their own
    /// bookkeeping keep the default.
    async fn purge_finished(&self, _older_than: Duration) -> CoreResult<u64> {
        Ok(0)
    }
}
