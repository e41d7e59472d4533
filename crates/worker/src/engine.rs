//! In-process execution engine.
//!
//! Tracks a [`NativeState`] per execution handle the way an external task
//! runner would. Workers report into it while they run a job; the TTL store
//! reads it back when reconciling a record. Finished executions are
//! dropped by [`ExecutionEngine::purge_finished`], driven by the sweeper.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_core::execution::{ExecutionEngine, NativeState};
use tokio::sync::RwLock;

struct Execution {
    state: NativeState,
    /// Set when `state` became final.
    finished_at: Option<Instant>,
}

impl Execution {
    fn set(&mut self, state: NativeState) {
        // Final native states are sticky.
        if self.state.is_final() {
            return;
        }
        if state.is_final() {
            self.finished_at = Some(Instant::now());
        }
        self.state = state;
    }
}

#[derive(Default)]
pub struct LocalExecutionEngine {
    executions: RwLock<HashMap<String, Execution>>,
}

impl LocalExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked executions, finished or not.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn unknown_handle(handle: &str) -> CoreError {
    CoreError::Internal(format!("Unknown execution handle: {handle}"))
}

#[async_trait]
impl ExecutionEngine for LocalExecutionEngine {
    async fn open(&self, job_id: &str) -> CoreResult<String> {
        let handle = format!("exec-{}", uuid::Uuid::new_v4());
        self.executions.write().await.insert(
            handle.clone(),
            Execution {
                state: NativeState::Pending,
                finished_at: None,
            },
        );
        tracing::debug!(job_id, handle = %handle, "Execution opened");
        Ok(handle)
    }

    async fn report(&self, handle: &str, state: NativeState) -> CoreResult<()> {
        let mut executions = self.executions.write().await;
        executions
            .get_mut(handle)
            .ok_or_else(|| unknown_handle(handle))?
            .set(state);
        Ok(())
    }

    async fn state(&self, handle: &str) -> CoreResult<Option<NativeState>> {
        Ok(self
            .executions
            .read()
            .await
            .get(handle)
            .map(|execution| execution.state.clone()))
    }

    async fn revoke(&self, handle: &str) -> CoreResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(handle)
            .ok_or_else(|| unknown_handle(handle))?;
        if !execution.state.is_final() {
            execution.set(NativeState::Revoked);
            tracing::debug!(handle, "Execution revoked");
        }
        Ok(())
    }

    async fn purge_finished(&self, older_than: Duration) -> CoreResult<u64> {
        let now = Instant::now();
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|_, execution| {
            !execution
                .finished_at
                .is_some_and(|at| now.duration_since(at) >= older_than)
        });
        Ok((before - executions.len()) as u64)
    }
}
