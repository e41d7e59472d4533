//! Canonical job status and its numeric wire codes.
//!
//! Each variant's discriminant is the code clients poll for. The code
//! table is static; there is exactly one internal representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric status code exposed on the wire.
pub type StatusCode = u16;

/// Job lifecycle status.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending = 200,
    Running = 201,
    Completed = 202,
    Failed = 203,
    Cancelled = 204,
}

/// Static projection table: status, wire code, wire name.
const STATUS_TABLE: [(JobStatus, StatusCode, &str); 5] = [
    (JobStatus::Pending, 200, "PENDING"),
    (JobStatus::Running, 201, "RUNNING"),
    (JobStatus::Completed, 202, "COMPLETED"),
    (JobStatus::Failed, 203, "FAILED"),
    (JobStatus::Cancelled, 204, "CANCELLED"),
];

impl JobStatus {
    /// Return the wire status code.
    pub fn code(self) -> StatusCode {
        self as StatusCode
    }

    /// Upper-case wire name, e.g. `"RUNNING"`.
    pub fn name(self) -> &'static str {
        STATUS_TABLE
            .iter()
            .find(|(status, _, _)| *status == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Look a status up by its wire code.
    pub fn from_code(code: StatusCode) -> Option<Self> {
        STATUS_TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(status, _, _)| *status)
    }

    /// Completed, failed and cancelled jobs never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// ```text
    /// PENDING --claim--> RUNNING --success--> COMPLETED
    ///                    RUNNING --error----> FAILED
    /// PENDING --cancel-> CANCELLED
    /// RUNNING --cancel-> CANCELLED
    /// ```
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl From<JobStatus> for StatusCode {
    fn from(value: JobStatus) -> Self {
        value.code()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STATUS_TABLE
            .iter()
            .find(|(_, _, name)| name.eq_ignore_ascii_case(s))
            .map(|(status, _, _)| *status)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}
