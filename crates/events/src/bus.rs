//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the dispatcher, the
//! worker pools, the cancellation controller and any subscriber.

use chrono::Utc;
use mediagraph_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// Something that happened to a job.
///
/// Built with [`JobEvent::new`] and optionally enriched with
/// [`with_payload`](JobEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// One of the `MSG_TYPE_JOB_*` constants, e.g. `"job_completed"`.
    pub event_type: String,

    pub job_id: JobId,

    pub job_type: String,

    /// Event-specific data (progress, error message, ...).
    pub payload: serde_json::Value,

    pub timestamp: Timestamp,
}

impl JobEvent {
    /// Create an event with an empty payload object.
    pub fn new(
        event_type: impl Into<String>,
        job_id: impl Into<JobId>,
        job_type: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: job_id.into(),
            job_type: job_type.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// When the buffer is full the oldest unread events are dropped and slow
/// receivers observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped silently when
    /// nobody is listening.
    pub fn publish(&self, event: JobEvent) {
        if let Ok(receivers) = self.sender.send(event.clone()) {
            tracing::trace!(
                event_type = %event.event_type,
                job_id = %event.job_id,
                receivers,
                "Published job event",
            );
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
