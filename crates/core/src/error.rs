use crate::status::JobStatus;

/// Error taxonomy shared by the store, dispatcher, workers and callers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Job not found: {id}")]
    NotFound { id: String },

    #[error("Job {id} already finished with status {status}")]
    AlreadyTerminal { id: String, status: JobStatus },

    #[error("Handler failed: {0}")]
    HandlerFailure(String),

    #[error("No worker registered for job type {job_type}")]
    DispatchFailure { job_type: String },

    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Job id collision: {id}")]
    Collision { id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}
