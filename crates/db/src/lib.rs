//! Job state persistence.
//!
//! [`JobStore`] is the single source of truth for every job. Two
//! interchangeable backends implement it:
//!
//! - [`MemoryJobStore`] keeps records in process memory.
//! - [`TtlJobStore`] persists one JSON record per job through a
//!   [`RecordStore`] with a fixed, refreshed TTL, and reconciles with an
//!   external execution engine at read time.

pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;
pub mod ttl;

pub use memory::MemoryJobStore;
pub use record::{JobRecord, RecordStore};
pub use sqlite::SqliteRecordStore;
pub use store::JobStore;
pub use ttl::{TtlJobStore, DEFAULT_KEY_PREFIX, DEFAULT_TTL};
