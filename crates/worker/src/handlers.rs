//! Built-in handlers, registered by the worker binary.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::handler::{HandlerError, HandlerRegistry, JobContext, JobHandler};

pub const ECHO: &str = "ECHO";
pub const SIMPLE_TEST: &str = "SIMPLE_TEST";

/// Registry with every built-in handler.
pub fn builtin_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .register(ECHO, EchoHandler)
        .register(SIMPLE_TEST, SimpleTestHandler)
}

/// Returns the payload unchanged, after `delay_ms` if the payload has one.
pub struct EchoHandler;

impl JobHandler for EchoHandler {
    fn handle(&self, payload: Value, _ctx: &JobContext) -> Result<Value, HandlerError> {
        if let Some(delay) = payload.get("delay_ms").and_then(Value::as_u64) {
            std::thread::sleep(Duration::from_millis(delay));
        }
        Ok(payload)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SimpleTestPayload {
    steps: Option<u64>,
    step_ms: Option<u64>,
    fail: Option<String>,
}

/// Walks `steps` sub-units (default 4), reporting progress after each.
///
/// Fails with the payload's `fail` message when present. Stops early when
/// the job is cancelled.
pub struct SimpleTestHandler;

const DEFAULT_STEPS: u64 = 4;

impl JobHandler for SimpleTestHandler {
    fn handle(&self, payload: Value, ctx: &JobContext) -> Result<Value, HandlerError> {
        let params: SimpleTestPayload = if payload.is_null() {
            SimpleTestPayload::default()
        } else {
            serde_json::from_value(payload)?
        };
        if let Some(reason) = params.fail {
            return Err(HandlerError::Failed(reason));
        }

        let steps = params.steps.unwrap_or(DEFAULT_STEPS);
        for step in 1..=steps {
            if ctx.is_cancelled() {
                return Err(HandlerError::failed("cancelled"));
            }
            if let Some(ms) = params.step_ms {
                std::thread::sleep(Duration::from_millis(ms));
            }
            ctx.report_progress(step, steps);
        }
        Ok(json!({ "steps": steps }))
    }
}
