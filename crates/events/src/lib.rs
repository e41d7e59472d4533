//! Job lifecycle events.
//!
//! [`EventBus`] fans [`JobEvent`]s out to any number of in-process
//! subscribers over a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::{EventBus, JobEvent, DEFAULT_CAPACITY};
