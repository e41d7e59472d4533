//! Bounded executor for handler bodies.
//!
//! Handlers are synchronous and may block, so they run through
//! `tokio::task::spawn_blocking`. A per-type [`Semaphore`] caps how many of
//! them run at once; a worker waits for a slot before it claims a job.

use std::sync::Arc;

use mediagraph_core::error::{CoreError, CoreResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    slots: usize,
}

impl BoundedExecutor {
    /// Create an executor with `slots` concurrent handler slots (at least 1).
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            slots,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> CoreResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal("Executor semaphore closed".to_string()))
    }

    /// Run `f` on the blocking pool.
    ///
    /// The slot is released when `f` returns, even if it panics.
    pub fn spawn<F, T>(&self, permit: OwnedSemaphorePermit, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
    }
}
