/// Job identifiers are type-prefixed strings, e.g. `ECHO_6f1c...`.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
