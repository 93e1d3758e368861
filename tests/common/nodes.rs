use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gategraph::graphs::{ComputeFn, ComputeInput, UserFnResult};

/// User function that sleeps before returning, for heartbeat and
/// abandonment scenarios.
pub struct SleepyNode {
    pub sleep: Duration,
    pub value: serde_json::Value,
}

#[async_trait]
impl ComputeFn for SleepyNode {
    async fn run(&self, _input: ComputeInput) -> UserFnResult {
        tokio::time::sleep(self.sleep).await;
        Ok(self.value.clone())
    }
}

/// User function that always fails and counts its invocations, for retry
/// accounting scenarios.
pub struct AlwaysFails {
    pub attempts: Arc<AtomicU32>,
}

#[async_trait]
impl ComputeFn for AlwaysFails {
    async fn run(&self, _input: ComputeInput) -> UserFnResult {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        Err(format!("attempt {attempt} failed").into())
    }
}

/// User function that sleeps briefly and counts successes, for the
/// concurrent-advance single-success property.
pub struct SlowCounter {
    pub runs: Arc<AtomicU32>,
    pub sleep: Duration,
}

#[async_trait]
impl ComputeFn for SlowCounter {
    async fn run(&self, _input: ComputeInput) -> UserFnResult {
        tokio::time::sleep(self.sleep).await;
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(serde_json::json!(run))
    }
}
