use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_db::{DEFAULT_KEY_PREFIX, DEFAULT_TTL};

/// Which [`JobStore`](mediagraph_db::JobStore) backend to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Single-process, in-memory records.
    Memory,
    /// Expiring JSON records in SQLite, reconciled with the execution engine.
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(CoreError::Validation(format!(
                "STORE_BACKEND must be 'memory' or 'sqlite', got '{other}'"
            ))),
        }
    }
}

/// What happens to a finished job's record once a caller has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Keep the record until its TTL elapses; reads are repeatable.
    #[default]
    Retain,
    /// Delete the record on the first read that observes a terminal status.
    ReadOnce,
}

impl FromStr for RetentionPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "read_once" | "read-once" => Ok(Self::ReadOnce),
            other => Err(CoreError::Validation(format!(
                "RETENTION_POLICY must be 'retain' or 'read_once', got '{other}'"
            ))),
        }
    }
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub store_backend: StoreBackend,
    /// SQLite connection string, used by the `sqlite` backend.
    pub database_url: String,
    /// Namespace prepended to every persisted record key.
    pub key_prefix: String,
    /// TTL applied to job records, refreshed on every write.
    pub job_ttl: Duration,
    pub retention: RetentionPolicy,
    /// Handler slots per job type unless overridden.
    pub default_concurrency: usize,
    /// Per job type slot counts.
    pub concurrency_overrides: HashMap<String, usize>,
    /// How often expired records are purged.
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: "sqlite:mediagraph_jobs.db".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            job_ttl: DEFAULT_TTL,
            retention: RetentionPolicy::Retain,
            default_concurrency: 1,
            concurrency_overrides: HashMap::new(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                     |
    /// |-------------------------------|-----------------------------|
    /// | `STORE_BACKEND`               | `memory`                    |
    /// | `DATABASE_URL`                | `sqlite:mediagraph_jobs.db` |
    /// | `JOB_KEY_PREFIX`              | `media_graph_task:`         |
    /// | `JOB_TTL_SECS`                | `3600`                      |
    /// | `RETENTION_POLICY`            | `retain`                    |
    /// | `WORKER_CONCURRENCY`          | `1`                         |
    /// | `WORKER_CONCURRENCY_OVERRIDES`| (none), e.g. `ECHO=4,X=2`   |
    /// | `SWEEP_INTERVAL_SECS`         | `60`                        |
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let store_backend = match lookup("STORE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.store_backend,
        };
        let retention = match lookup("RETENTION_POLICY") {
            Some(raw) => raw.parse()?,
            None => defaults.retention,
        };

        let job_ttl = match lookup("JOB_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("JOB_TTL_SECS", &raw)? as u64),
            None => defaults.job_ttl,
        };
        let sweep_interval = match lookup("SWEEP_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("SWEEP_INTERVAL_SECS", &raw)? as u64),
            None => defaults.sweep_interval,
        };
        let default_concurrency = match lookup("WORKER_CONCURRENCY") {
            Some(raw) => parse_positive("WORKER_CONCURRENCY", &raw)?,
            None => defaults.default_concurrency,
        };
        let concurrency_overrides = match lookup("WORKER_CONCURRENCY_OVERRIDES") {
            Some(raw) => parse_overrides(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            store_backend,
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            key_prefix: lookup("JOB_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            job_ttl,
            retention,
            default_concurrency,
            concurrency_overrides,
            sweep_interval,
        })
    }

    /// Handler slots for `job_type`.
    pub fn concurrency_for(&self, job_type: &str) -> usize {
        self.concurrency_overrides
            .get(job_type)
            .copied()
            .unwrap_or(self.default_concurrency)
    }
}

fn parse_positive(name: &str, raw: &str) -> CoreResult<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CoreError::Validation(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}

/// Parse `TYPE=n,TYPE=n`.
fn parse_overrides(raw: &str) -> CoreResult<HashMap<String, usize>> {
    let mut overrides = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((job_type, slots)) = pair.split_once('=') else {
            return Err(CoreError::Validation(format!(
                "WORKER_CONCURRENCY_OVERRIDES entry '{pair}' must look like TYPE=n"
            )));
        };
        let slots = parse_positive("WORKER_CONCURRENCY_OVERRIDES", slots)?;
        overrides.insert(job_type.trim().to_string(), slots);
    }
    Ok(overrides)
}
