//! The watchdog: heartbeat partner of a `computing` row.
//!
//! Each launched worker gets one watchdog task. The watchdog sleeps the
//! node's heartbeat interval (with up to ±20% jitter so fleets do not
//! thunder), re-stamps `last_heartbeat_at`, and extends
//! `heartbeat_deadline` to `now + timeout`. A tick that finds the
//! deadline already missed (or the `abandon_after` lifetime exceeded)
//! kills the worker task and marks the row abandoned. The watchdog exits
//! on its own when the row leaves `computing`.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use tokio::task::{AbortHandle, JoinHandle};

use crate::graphs::RunPolicy;
use crate::store::{HeartbeatOutcome, Store, now_epoch};

/// Sleep duration for one tick: `interval ± 20%`.
fn jittered(interval_seconds: i64) -> Duration {
    let factor: f64 = rand::rng().random_range(0.8..=1.2);
    Duration::from_secs_f64(interval_seconds.max(1) as f64 * factor)
}

/// Spawn the watchdog for one `computing` row.
///
/// `worker` is the abort handle of the user-function task; aborting it is
/// the cooperative kill. The returned handle lets the worker stop the
/// watchdog once the outcome is recorded.
pub fn spawn(
    store: Arc<dyn Store>,
    computation_id: i64,
    start_time: i64,
    policy: RunPolicy,
    worker: AbortHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(jittered(policy.heartbeat_interval_seconds)).await;

            let lifetime_exceeded = policy
                .abandon_after_seconds
                .is_some_and(|bound| now_epoch() - start_time > bound);

            if lifetime_exceeded {
                abandon(&store, computation_id, &worker, "lifetime exceeded").await;
                break;
            }

            match store
                .heartbeat(computation_id, policy.heartbeat_timeout_seconds)
                .await
            {
                Ok(HeartbeatOutcome::Extended { deadline }) => {
                    tracing::trace!(computation_id, deadline, "heartbeat extended");
                }
                Ok(HeartbeatOutcome::Finished) => break,
                Ok(HeartbeatOutcome::MissedDeadline) => {
                    abandon(&store, computation_id, &worker, "heartbeat deadline missed").await;
                    break;
                }
                // Transient store trouble: keep the worker alive and try
                // again next tick; the abandoned sweep is the backstop.
                Err(e) => {
                    tracing::warn!(computation_id, error = %e, "heartbeat failed");
                }
            }
        }
    })
}

async fn abandon(
    store: &Arc<dyn Store>,
    computation_id: i64,
    worker: &AbortHandle,
    reason: &str,
) {
    worker.abort();
    match store.abandon_computation(computation_id).await {
        Ok(Some(_)) => {
            tracing::warn!(computation_id, reason, "computation abandoned by watchdog");
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(computation_id, error = %e, "failed to abandon computation");
        }
    }
}
