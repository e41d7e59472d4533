//! Event type constants for job lifecycle notifications.
//!
//! Published on the event bus by the dispatcher, the worker pools and the
//! cancellation controller.

/// Job accepted and persisted as pending.
pub const MSG_TYPE_JOB_SUBMITTED: &str = "job_submitted";

/// Job claimed by its worker and handed to the handler.
pub const MSG_TYPE_JOB_STARTED: &str = "job_started";

/// Progress update during job execution (percentage).
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job was cancelled (by a caller, or found cancelled at claim time).
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";

/// Job type had no registered worker; the job stays pending.
pub const MSG_TYPE_JOB_DEAD_LETTERED: &str = "job_dead_lettered";
