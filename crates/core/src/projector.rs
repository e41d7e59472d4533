//! Status projection.
//!
//! Renders a [`Job`] into the [`StatusView`] callers poll, and folds an
//! execution engine's [`NativeState`] into a stored job.

use crate::execution::NativeState;
use crate::job::{Job, StatusView, PROGRESS_COMPLETE};
use crate::status::JobStatus;

/// Map a native engine state onto the canonical status.
pub fn project_native(state: &NativeState) -> JobStatus {
    match state {
        NativeState::Pending => JobStatus::Pending,
        NativeState::Started | NativeState::Progress { .. } | NativeState::Retry => {
            JobStatus::Running
        }
        NativeState::Success { .. } => JobStatus::Completed,
        NativeState::Failure { .. } => JobStatus::Failed,
        NativeState::Revoked => JobStatus::Cancelled,
    }
}

/// Merge the engine's view of a job into the stored record.
///
/// A stored terminal status always wins. Otherwise the native state is
/// applied along the lifecycle graph, stepping a pending job through
/// `Running` when the engine already finished it. Returns `true` if the
/// record changed.
pub fn merge_native(job: &mut Job, state: &NativeState) -> bool {
    if job.is_terminal() {
        return false;
    }

    let target = project_native(state);
    let mut changed = false;

    if job.status == JobStatus::Pending
        && matches!(target, JobStatus::Running | JobStatus::Completed | JobStatus::Failed)
    {
        changed |= job.apply_status(JobStatus::Running, None);
    }

    match state {
        NativeState::Pending | NativeState::Started | NativeState::Retry => {}
        NativeState::Progress { progress } => {
            // Engine progress wins unless it would move a running job backwards.
            if let Some(progress) = progress {
                if *progress != job.progress {
                    changed |= job.apply_progress(*progress);
                }
            }
        }
        NativeState::Success { result } => {
            if job.result.last() != Some(result) {
                changed |= job.push_result(result.clone());
            }
            changed |= job.apply_progress(PROGRESS_COMPLETE);
            changed |= job.apply_status(JobStatus::Completed, None);
        }
        NativeState::Failure { error } => {
            changed |= job.apply_status(JobStatus::Failed, Some(error));
        }
        NativeState::Revoked => {
            changed |= job.request_cancel();
        }
    }

    changed
}

/// Human-readable message for a job: the status name, prefixed to the
/// recorded detail when there is one.
pub fn render_message(job: &Job) -> String {
    match job.message.as_deref() {
        Some(detail) if !detail.is_empty() => format!("[{}]: {detail}", job.status),
        _ => job.status.name().to_string(),
    }
}

/// Render the caller-facing view of a job.
///
/// Results are exposed while running (partials) and once completed. A
/// cancelled job never exposes results, even if an in-flight handler
/// produced one after the cancellation.
pub fn render(job: &Job) -> StatusView {
    let result = match job.status {
        JobStatus::Running | JobStatus::Completed => Some(job.result.clone()),
        JobStatus::Pending | JobStatus::Failed | JobStatus::Cancelled => None,
    };

    StatusView {
        status: job.status,
        code: job.status.code(),
        message: render_message(job),
        progress: job.progress,
        result,
    }
}
