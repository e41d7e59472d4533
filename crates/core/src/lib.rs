//! Domain model for the mediagraph job orchestration service.
//!
//! Everything here is backend-agnostic: the job record and its state
//! machine, the canonical status with its wire codes, the projection of
//! native execution-engine states, and the shared error taxonomy.

pub mod error;
pub mod execution;
pub mod job;
pub mod job_events;
pub mod naming;
pub mod projector;
pub mod status;
pub mod types;
