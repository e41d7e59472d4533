//! Job id generation and job type validation.

use crate::error::CoreError;
use crate::types::JobId;

/// Maximum length of a job type tag.
const MAX_JOB_TYPE_LEN: usize = 64;

/// Build a fresh job id: `<job_type>_<uuid v4>`.
pub fn generate_job_id(job_type: &str) -> JobId {
    format!("{job_type}_{}", uuid::Uuid::new_v4())
}

/// Key under which a job record is persisted, e.g. `media_graph_task:ECHO_...`.
pub fn record_key(prefix: &str, job_id: &str) -> String {
    format!("{prefix}{job_id}")
}

/// Validate a job type tag.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_JOB_TYPE_LEN` characters.
/// - Must contain only ASCII alphanumeric, hyphen, or underscore characters.
pub fn validate_job_type(job_type: &str) -> Result<(), CoreError> {
    if job_type.is_empty() {
        return Err(CoreError::Validation(
            "Job type must not be empty".to_string(),
        ));
    }
    if job_type.len() > MAX_JOB_TYPE_LEN {
        return Err(CoreError::Validation(format!(
            "Job type must not exceed {MAX_JOB_TYPE_LEN} characters"
        )));
    }
    if !job_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(
            "Job type may only contain alphanumeric, hyphen, or underscore characters"
                .to_string(),
        ));
    }
    Ok(())
}
