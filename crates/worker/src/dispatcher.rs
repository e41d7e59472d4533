//! Submission dispatcher.
//!
//! A single long-lived task drains the submission channel and forwards
//! each job id to the channel of the worker pool registered for its type.
//! The routing table is fixed at start-up. Jobs of an unknown type are
//! dead-lettered and stay `PENDING`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_core::job_events::MSG_TYPE_JOB_DEAD_LETTERED;
use mediagraph_core::types::{JobId, Timestamp};
use mediagraph_events::{EventBus, JobEvent};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// A freshly created job waiting to be routed.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: JobId,
    pub job_type: String,
}

/// A submission that no worker pool accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub job_id: JobId,
    pub job_type: String,
    pub at: Timestamp,
}

/// Shared log of the most recent dead letters, oldest first.
pub type DeadLetterLog = Arc<RwLock<VecDeque<DeadLetter>>>;

/// Dead letters kept before the oldest are dropped.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1024;

pub struct Dispatcher {
    routes: HashMap<String, mpsc::UnboundedSender<JobId>>,
    dead_letters: DeadLetterLog,
    dead_letter_capacity: usize,
    events: Arc<EventBus>,
}

impl Dispatcher {
    pub fn new(
        routes: HashMap<String, mpsc::UnboundedSender<JobId>>,
        dead_letters: DeadLetterLog,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            routes,
            dead_letters,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            events,
        }
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity.max(1);
        self
    }

    /// Forward one submission to its type's queue.
    pub fn route(&self, submission: &Submission) -> CoreResult<()> {
        let dispatch_failure = || CoreError::DispatchFailure {
            job_type: submission.job_type.clone(),
        };
        let queue = self
            .routes
            .get(&submission.job_type)
            .ok_or_else(dispatch_failure)?;
        // A closed queue means the pool has stopped.
        queue
            .send(submission.job_id.clone())
            .map_err(|_| dispatch_failure())
    }

    /// Run until `cancel` fires or every submitter is gone.
    pub async fn run(
        self,
        mut submissions: mpsc::UnboundedReceiver<Submission>,
        cancel: CancellationToken,
    ) {
        tracing::info!(routes = self.routes.len(), "Job dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                next = submissions.recv() => {
                    let Some(submission) = next else {
                        tracing::info!("Submission channel closed, dispatcher stopping");
                        break;
                    };
                    self.dispatch(submission).await;
                }
            }
        }
    }

    async fn dispatch(&self, submission: Submission) {
        match self.route(&submission) {
            Ok(()) => {
                tracing::debug!(
                    job_id = %submission.job_id,
                    job_type = %submission.job_type,
                    "Job routed",
                );
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %submission.job_id,
                    job_type = %submission.job_type,
                    error = %e,
                    "Job dead-lettered",
                );
                {
                    let mut log = self.dead_letters.write().await;
                    while log.len() >= self.dead_letter_capacity {
                        log.pop_front();
                    }
                    log.push_back(DeadLetter {
                        job_id: submission.job_id.clone(),
                        job_type: submission.job_type.clone(),
                        at: Utc::now(),
                    });
                }
                self.events.publish(JobEvent::new(
                    MSG_TYPE_JOB_DEAD_LETTERED,
                    submission.job_id,
                    submission.job_type,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn submission(job_id: &str, job_type: &str) -> Submission {
        Submission {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
        }
    }

    #[test]
    fn routes_by_job_type() {
        let (echo_tx, mut echo_rx) = mpsc::unbounded_channel();
        let routes = HashMap::from([("ECHO".to_string(), echo_tx)]);
        let dispatcher = Dispatcher::new(routes, Default::default(), Arc::new(EventBus::default()));

        dispatcher.route(&submission("ECHO_1", "ECHO")).unwrap();
        dispatcher.route(&submission("ECHO_2", "ECHO")).unwrap();
        assert_eq!(echo_rx.try_recv().unwrap(), "ECHO_1");
        assert_eq!(echo_rx.try_recv().unwrap(), "ECHO_2");

        assert_matches!(
            dispatcher.route(&submission("X_1", "UNKNOWN")),
            Err(CoreError::DispatchFailure { job_type }) if job_type == "UNKNOWN"
        );
    }

    #[tokio::test]
    async fn unknown_type_is_dead_lettered() {
        let dead_letters = DeadLetterLog::default();
        let events = Arc::new(EventBus::default());
        let mut event_rx = events.subscribe();
        let dispatcher = Dispatcher::new(HashMap::new(), dead_letters.clone(), events);

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(rx, cancel.clone()));

        tx.send(submission("FOO_1", "FOO")).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, MSG_TYPE_JOB_DEAD_LETTERED);
        assert_eq!(event.job_id, "FOO_1");

        let log = dead_letters.read().await.clone();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].job_type, "FOO");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dead_letter_log_keeps_only_the_newest() {
        let dead_letters = DeadLetterLog::default();
        let dispatcher = Dispatcher::new(
            HashMap::new(),
            dead_letters.clone(),
            Arc::new(EventBus::default()),
        )
        .with_dead_letter_capacity(2);

        for n in 1..=3 {
            dispatcher.dispatch(submission(&format!("FOO_{n}"), "FOO")).await;
        }

        let ids: Vec<_> = dead_letters
            .read()
            .await
            .iter()
            .map(|letter| letter.job_id.clone())
            .collect();
        assert_eq!(ids, vec!["FOO_2", "FOO_3"]);
    }
}
