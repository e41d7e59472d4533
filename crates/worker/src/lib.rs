//! Job orchestration worker.
//!
//! Wires the [`JobStore`](mediagraph_db::JobStore) to a submission
//! [`Dispatcher`](dispatcher::Dispatcher), one
//! [`WorkerPool`](pool::WorkerPool) per registered job type and the
//! [`CancellationController`](cancel::CancellationController), all behind
//! the [`Orchestrator`](orchestrator::Orchestrator) facade.

pub mod bootstrap;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod handler;
pub mod handlers;
pub mod orchestrator;
pub mod pool;
pub mod sweeper;

pub use config::{RetentionPolicy, StoreBackend, WorkerConfig};
pub use handler::{HandlerError, HandlerRegistry, JobContext, JobHandler};
pub use orchestrator::Orchestrator;
