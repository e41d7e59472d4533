//! End-to-end tests for the `Orchestrator`.
//!
//! Every scenario runs against both store backends: the in-memory store and
//! the TTL record store on an in-memory SQLite database with the local
//! execution engine attached.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use mediagraph_core::error::{CoreError, CoreResult};
use mediagraph_core::execution::{ExecutionEngine, NativeState};
use mediagraph_core::job::StatusView;
use mediagraph_core::job_events::{
    MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_STARTED, MSG_TYPE_JOB_SUBMITTED,
};
use mediagraph_core::status::JobStatus;
use mediagraph_db::{JobStore, MemoryJobStore, RecordStore, SqliteRecordStore, TtlJobStore};
use mediagraph_worker::engine::LocalExecutionEngine;
use mediagraph_worker::handlers::{SimpleTestHandler, SIMPLE_TEST};
use mediagraph_worker::{
    HandlerError, HandlerRegistry, JobContext, Orchestrator, RetentionPolicy, WorkerConfig,
};
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug)]
enum Backend {
    Memory,
    Sqlite,
}

const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

async fn start_with(backend: Backend, registry: HandlerRegistry, config: WorkerConfig) -> Orchestrator {
    let (store, engine): (Arc<dyn JobStore>, Option<Arc<dyn ExecutionEngine>>) = match backend {
        Backend::Memory => (Arc::new(MemoryJobStore::new()), None),
        Backend::Sqlite => {
            let engine: Arc<dyn ExecutionEngine> = Arc::new(LocalExecutionEngine::new());
            let records = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
            let store = TtlJobStore::new(records).with_engine(engine.clone());
            (Arc::new(store), Some(engine))
        }
    };
    Orchestrator::start(config, store, registry, engine)
        .await
        .expect("orchestrator should start")
}

async fn start(backend: Backend, registry: HandlerRegistry) -> Orchestrator {
    start_with(backend, registry, WorkerConfig::default()).await
}

/// Handler that sleeps `ms` and echoes its payload.
fn sleepy(ms: u64) -> impl Fn(Value, &JobContext) -> Result<Value, HandlerError> + Send + Sync + 'static {
    move |payload: Value, _: &JobContext| -> Result<Value, HandlerError> {
        std::thread::sleep(Duration::from_millis(ms));
        Ok(payload)
    }
}

/// Poll until the job reports `code`, or panic after 2 s.
async fn wait_for_code(orch: &Orchestrator, job_id: &str, code: u16) -> StatusView {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let view = orch.get_status(job_id).await.unwrap();
            if view.code == code {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {job_id} never reached code {code}"))
}

// ---------------------------------------------------------------------------
// Test: successful job reports running, then completed with its result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn echo_job_completes_with_payload() {
    for backend in BACKENDS {
        let orch = start(backend, HandlerRegistry::new().register("ECHO", sleepy(50))).await;

        let id = orch.submit("ECHO", json!({"v": 1})).await.unwrap();
        assert!(id.starts_with("ECHO_"), "{backend:?}: id must be type-prefixed");

        let early = orch.get_status(&id).await.unwrap();
        assert!(
            early.code == 200 || early.code == 201,
            "{backend:?}: unexpected early code {}",
            early.code
        );

        let done = wait_for_code(&orch, &id, 202).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.message, "COMPLETED");
        assert_eq!(done.progress, 100.0);
        assert_eq!(done.result, Some(vec![json!({"v": 1})]), "{backend:?}");

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: handler error is recorded as FAILED with its message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_handler_marks_job_failed() {
    for backend in BACKENDS {
        let registry = HandlerRegistry::new().register(
            "BAD",
            |_: Value, _: &JobContext| -> Result<Value, HandlerError> {
                Err(HandlerError::failed("bad input"))
            },
        );
        let orch = start(backend, registry).await;

        let id = orch.submit("BAD", json!({})).await.unwrap();
        let view = wait_for_code(&orch, &id, 203).await;
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.message.contains("bad input"), "{backend:?}: {}", view.message);
        assert!(view.result.is_none());

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: handler panic is recorded as FAILED
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_handler_marks_job_failed() {
    for backend in BACKENDS {
        let registry = HandlerRegistry::new().register(
            "PANIC",
            |_: Value, _: &JobContext| -> Result<Value, HandlerError> { panic!("kaboom") },
        );
        let orch = start(backend, registry).await;

        let id = orch.submit("PANIC", json!(null)).await.unwrap();
        let view = wait_for_code(&orch, &id, 203).await;
        assert_eq!(view.message, "[FAILED]: handler panicked");

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: a job cancelled before claim never reaches its handler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_before_claim_skips_handler() {
    for backend in BACKENDS {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = HandlerRegistry::new().register_with_concurrency(
            "SLOW",
            move |payload: Value, _: &JobContext| -> Result<Value, HandlerError> {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(200));
                Ok(payload)
            },
            1,
        );
        let orch = start(backend, registry).await;

        let blocker = orch.submit("SLOW", json!({"n": 1})).await.unwrap();
        wait_for_code(&orch, &blocker, 201).await;

        let queued = orch.submit("SLOW", json!({"n": 2})).await.unwrap();
        let outcome = orch.cancel(&queued).await.unwrap();
        assert!(outcome.accepted, "{backend:?}");
        assert_eq!(orch.get_status(&queued).await.unwrap().code, 204);

        wait_for_code(&orch, &blocker, 202).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let view = orch.get_status(&queued).await.unwrap();
        assert_eq!(view.code, 204, "{backend:?}");
        assert!(view.result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{backend:?}: handler ran for cancelled job");

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: cancelling twice is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_cancel_is_rejected() {
    for backend in BACKENDS {
        let registry = HandlerRegistry::new().register_with_concurrency("SLOW", sleepy(200), 1);
        let orch = start(backend, registry).await;

        let blocker = orch.submit("SLOW", json!(null)).await.unwrap();
        let queued = orch.submit("SLOW", json!(null)).await.unwrap();

        assert!(orch.cancel(&queued).await.unwrap().accepted);
        let second = orch.cancel(&queued).await.unwrap();
        assert!(!second.accepted, "{backend:?}");
        assert_eq!(second.reason.as_deref(), Some("already finished"));
        assert_eq!(orch.get_status(&queued).await.unwrap().status, JobStatus::Cancelled);

        wait_for_code(&orch, &blocker, 202).await;
        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: cancelling a finished job leaves it untouched
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_after_completion_is_rejected() {
    for backend in BACKENDS {
        let orch = start(backend, HandlerRegistry::new().register("ECHO", sleepy(0))).await;

        let id = orch.submit("ECHO", json!({"v": 1})).await.unwrap();
        wait_for_code(&orch, &id, 202).await;

        let outcome = orch.cancel(&id).await.unwrap();
        assert!(!outcome.accepted, "{backend:?}");
        let view = orch.get_status(&id).await.unwrap();
        assert_eq!(view.code, 202);
        assert_eq!(view.result, Some(vec![json!({"v": 1})]));

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: cancelling a running job discards its late result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_while_running_discards_result() {
    for backend in BACKENDS {
        let orch = start(backend, HandlerRegistry::new().register("SLOW", sleepy(150))).await;

        let id = orch.submit("SLOW", json!({"v": 1})).await.unwrap();
        wait_for_code(&orch, &id, 201).await;
        assert!(orch.cancel(&id).await.unwrap().accepted);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let view = orch.get_status(&id).await.unwrap();
        assert_eq!(view.code, 204, "{backend:?}");
        assert!(view.result.is_none());

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: unknown ids surface NotFound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_is_not_found() {
    for backend in BACKENDS {
        let orch = start(backend, HandlerRegistry::new().register("ECHO", sleepy(0))).await;

        assert_matches!(
            orch.get_status("ECHO_does-not-exist").await,
            Err(CoreError::NotFound { .. })
        );
        assert_matches!(
            orch.cancel("ECHO_does-not-exist").await,
            Err(CoreError::NotFound { .. })
        );

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: a blocked job type does not delay another type
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_types_progress_independently() {
    for backend in BACKENDS {
        let registry = HandlerRegistry::new()
            .register("BLOCK", sleepy(600))
            .register("ECHO", sleepy(10));
        let orch = start(backend, registry).await;

        let blocked = orch.submit("BLOCK", json!(null)).await.unwrap();
        wait_for_code(&orch, &blocked, 201).await;

        let echo = orch.submit("ECHO", json!({"v": 2})).await.unwrap();
        wait_for_code(&orch, &echo, 202).await;

        let still = orch.get_status(&blocked).await.unwrap();
        assert_eq!(still.code, 201, "{backend:?}: BLOCK should still be running");

        wait_for_code(&orch, &blocked, 202).await;
        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: observed progress never goes backwards
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_is_monotonic() {
    for backend in BACKENDS {
        let orch = start(
            backend,
            HandlerRegistry::new().register(SIMPLE_TEST, SimpleTestHandler),
        )
        .await;

        let id = orch
            .submit(SIMPLE_TEST, json!({"steps": 5, "step_ms": 20}))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let done = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let view = orch.get_status(&id).await.unwrap();
                seen.push(view.progress);
                if view.status.is_terminal() {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        })
        .await
        .expect("SIMPLE_TEST should finish");

        assert_eq!(done.code, 202);
        assert_eq!(done.result, Some(vec![json!({"steps": 5})]));
        assert!(
            seen.windows(2).all(|w| w[0] <= w[1]),
            "{backend:?}: progress went backwards: {seen:?}"
        );
        assert_eq!(seen.last().copied(), Some(100.0));

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: jobs with no registered worker are dead-lettered and stay pending
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unrouted_job_is_dead_lettered() {
    for backend in BACKENDS {
        let orch = start(backend, HandlerRegistry::new().register("ECHO", sleepy(0))).await;

        let id = orch.submit("UNKNOWN", json!(null)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while orch.dead_letters().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("submission should be dead-lettered");

        let letters = orch.dead_letters().await;
        assert_eq!(letters[0].job_id, id);
        assert_eq!(letters[0].job_type, "UNKNOWN");
        assert_eq!(orch.get_status(&id).await.unwrap().code, 200, "{backend:?}");

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: malformed job types are rejected at submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_job_type_is_rejected() {
    let orch = start(Backend::Memory, HandlerRegistry::new().register("ECHO", sleepy(0))).await;

    assert_matches!(orch.submit("", json!(null)).await, Err(CoreError::Validation(_)));
    assert_matches!(
        orch.submit("bad type!", json!(null)).await,
        Err(CoreError::Validation(_))
    );

    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: read-once retention deletes the record after a terminal read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_once_retention_deletes_after_terminal_read() {
    for backend in BACKENDS {
        let config = WorkerConfig {
            retention: RetentionPolicy::ReadOnce,
            ..WorkerConfig::default()
        };
        let orch = start_with(backend, HandlerRegistry::new().register("ECHO", sleepy(0)), config)
            .await;

        let id = orch.submit("ECHO", json!({"v": 1})).await.unwrap();
        let view = wait_for_code(&orch, &id, 202).await;
        assert_eq!(view.result, Some(vec![json!({"v": 1})]));

        assert_matches!(
            orch.get_status(&id).await,
            Err(CoreError::NotFound { .. }),
            "{backend:?}: second read must miss"
        );

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: lifecycle events are published in order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lifecycle_events_are_published() {
    for backend in BACKENDS {
        let orch = start(backend, HandlerRegistry::new().register("ECHO", sleepy(0))).await;
        let mut events = orch.subscribe();

        let id = orch.submit("ECHO", json!(null)).await.unwrap();

        let mut kinds = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.unwrap();
                assert_eq!(event.job_id, id);
                let done = event.event_type == MSG_TYPE_JOB_COMPLETED;
                kinds.push(event.event_type);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("job should complete");

        assert_eq!(kinds.first().map(String::as_str), Some(MSG_TYPE_JOB_SUBMITTED));
        assert!(kinds.iter().any(|k| k == MSG_TYPE_JOB_STARTED), "{backend:?}: {kinds:?}");

        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: start-up validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_registry_is_rejected() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let result = Orchestrator::start(WorkerConfig::default(), store, HandlerRegistry::new(), None).await;
    assert_matches!(result, Err(CoreError::Validation(_)));
}

#[tokio::test]
async fn health_check_reports_store_liveness() {
    for backend in BACKENDS {
        let orch = start(backend, HandlerRegistry::new().register("ECHO", sleepy(0))).await;
        orch.health_check().await.unwrap();
        orch.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test: a lower progress report never rolls back a running job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_lower_progress_is_ignored_by_reconciliation() {
    let registry = HandlerRegistry::new().register(
        "STEPS",
        |payload: Value, ctx: &JobContext| -> Result<Value, HandlerError> {
            ctx.report_progress(3, 4);
            std::thread::sleep(Duration::from_millis(60));
            ctx.report_progress(1, 4);
            std::thread::sleep(Duration::from_millis(60));
            Ok(payload)
        },
    );
    let orch = start(Backend::Sqlite, registry).await;

    let id = orch.submit("STEPS", json!(null)).await.unwrap();
    let mut running = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let view = orch.get_status(&id).await.unwrap();
            if view.status.is_terminal() {
                assert_eq!(view.code, 202);
                break;
            }
            if view.code == 201 {
                running.push(view.progress);
            }
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
    })
    .await
    .expect("STEPS should finish");

    assert!(running.contains(&75.0), "never observed 75%: {running:?}");
    assert!(
        running.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {running:?}"
    );

    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: completion is announced even when a read settles the job first
// ---------------------------------------------------------------------------

/// Local engine that stalls the reporting worker after a final state, so
/// readers reconcile the record before the worker writes it.
struct SlowFinalEngine {
    inner: LocalExecutionEngine,
}

#[async_trait]
impl ExecutionEngine for SlowFinalEngine {
    async fn open(&self, job_id: &str) -> CoreResult<String> {
        self.inner.open(job_id).await
    }

    async fn report(&self, handle: &str, state: NativeState) -> CoreResult<()> {
        let is_final = state.is_final();
        self.inner.report(handle, state).await?;
        if is_final {
            tokio::time::sleep(Duration::from_millis(80)).await;
        }
        Ok(())
    }

    async fn state(&self, handle: &str) -> CoreResult<Option<NativeState>> {
        self.inner.state(handle).await
    }

    async fn revoke(&self, handle: &str) -> CoreResult<()> {
        self.inner.revoke(handle).await
    }
}

#[tokio::test]
async fn completion_event_survives_read_time_settlement() {
    let engine: Arc<dyn ExecutionEngine> = Arc::new(SlowFinalEngine {
        inner: LocalExecutionEngine::new(),
    });
    let records = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
    let store: Arc<dyn JobStore> = Arc::new(TtlJobStore::new(records).with_engine(engine.clone()));
    let orch = Orchestrator::start(
        WorkerConfig::default(),
        store,
        HandlerRegistry::new().register("ECHO", sleepy(20)),
        Some(engine),
    )
    .await
    .unwrap();
    let mut events = orch.subscribe();

    let id = orch.submit("ECHO", json!({"v": 1})).await.unwrap();
    // Reads during the stall fold SUCCESS into the record.
    let view = wait_for_code(&orch, &id, 202).await;
    assert_eq!(view.result, Some(vec![json!({"v": 1})]));

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.event_type == MSG_TYPE_JOB_COMPLETED {
                assert_eq!(event.job_id, id);
                break;
            }
        }
    })
    .await
    .expect("job_completed should still be published");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let view = orch.get_status(&id).await.unwrap();
    assert_eq!(view.result, Some(vec![json!({"v": 1})]), "result appended twice");

    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: an unreachable store surfaces StoreUnavailable
// ---------------------------------------------------------------------------

/// SQLite record store that can be switched off.
struct SwitchableRecordStore {
    inner: SqliteRecordStore,
    down: AtomicBool,
}

impl SwitchableRecordStore {
    fn check(&self) -> CoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CoreError::StoreUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SwitchableRecordStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()> {
        self.check()?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> CoreResult<bool> {
        self.check()?;
        self.inner.del(key).await
    }

    async fn purge_expired(&self) -> CoreResult<u64> {
        self.check()?;
        self.inner.purge_expired().await
    }

    async fn ping(&self) -> CoreResult<()> {
        self.check()?;
        self.inner.ping().await
    }
}

#[tokio::test]
async fn unavailable_store_is_reported_not_masked() {
    let records = Arc::new(SwitchableRecordStore {
        inner: SqliteRecordStore::in_memory().await.unwrap(),
        down: AtomicBool::new(true),
    });
    let store: Arc<dyn JobStore> = Arc::new(TtlJobStore::new(records.clone()));
    let registry = || HandlerRegistry::new().register("ECHO", sleepy(0));

    let refused = Orchestrator::start(WorkerConfig::default(), store.clone(), registry(), None).await;
    assert_matches!(refused, Err(CoreError::StoreUnavailable(_)));

    records.down.store(false, Ordering::SeqCst);
    let orch = Orchestrator::start(WorkerConfig::default(), store, registry(), None)
        .await
        .unwrap();
    let id = orch.submit("ECHO", json!(null)).await.unwrap();
    wait_for_code(&orch, &id, 202).await;

    records.down.store(true, Ordering::SeqCst);
    assert_matches!(
        orch.submit("ECHO", json!(null)).await,
        Err(CoreError::StoreUnavailable(_))
    );
    assert_matches!(orch.get_status(&id).await, Err(CoreError::StoreUnavailable(_)));
    assert_matches!(orch.health_check().await, Err(CoreError::StoreUnavailable(_)));

    records.down.store(false, Ordering::SeqCst);
    assert_eq!(orch.get_status(&id).await.unwrap().code, 202);

    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: submissions after shutdown leave no record behind
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_after_shutdown_creates_nothing() {
    let memory = Arc::new(MemoryJobStore::new());
    let orch = Orchestrator::start(
        WorkerConfig::default(),
        memory.clone(),
        HandlerRegistry::new().register("ECHO", sleepy(0)),
        None,
    )
    .await
    .unwrap();
    orch.shutdown().await;

    assert_matches!(orch.submit("ECHO", json!(null)).await, Err(CoreError::Internal(_)));
    assert!(memory.is_empty().await, "orphan PENDING record left behind");
}
