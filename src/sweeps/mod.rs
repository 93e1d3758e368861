//! Background sweeps: the periodic jobs that keep executions moving
//! without callers.
//!
//! Three sweep families run on a shared cadence, each with its own
//! `SweepRun` watermark row:
//!
//! * **schedule-fire** kicks `advance` for executions whose timer
//!   moments have arrived and still have pending downstream work;
//! * **abandoned-revival** moves `computing` rows past their heartbeat
//!   deadline to `abandoned` and re-queues them per the retry policy;
//! * **recurring-reschedule** queues a fresh pending computation for a
//!   fired `schedule_recurring` tick once every downstream consumer has
//!   observed it, so the timer produces its next moment.
//!
//! Each tick processes only executions whose `updated_at` is at or after
//! the last completed run's `started_at` minus a small overlap (one hour
//! back when no run completed yet). Sweep errors are logged and absorbed;
//! the next tick retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::gating::eval::timer_arrived;
use crate::graphs::Graph;
use crate::schedulers::{Scheduler, SchedulerError, recompute};
use crate::store::{ExecutionSnapshot, Store, SweepRunRow, now_epoch};
use crate::types::{NodeType, SweepType};

/// Cadence and window settings for the sweep driver.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Whether the engine spawns the driver at startup.
    pub enabled: bool,
    /// Pause between ticks of each sweep family.
    pub tick_interval: Duration,
    /// Re-process window behind the last completed run's start.
    pub overlap_seconds: i64,
    /// Window when no completed run exists yet.
    pub fallback_window_seconds: i64,
    /// Heartbeat deadlines get this much slack before revival.
    pub abandon_grace_seconds: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            enabled: true,
            tick_interval: Duration::from_secs(60),
            overlap_seconds: 60,
            fallback_window_seconds: 3_600,
            abandon_grace_seconds: 5,
        }
    }
}

/// Handle to the spawned sweep tasks.
pub struct SweepDriver {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SweepDriver {
    /// Spawn one periodic task per sweep family.
    #[must_use]
    pub fn spawn(scheduler: Arc<Scheduler>, config: SweepConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();
        for sweep_type in [
            SweepType::ScheduleFire,
            SweepType::AbandonedRevival,
            SweepType::RecurringReschedule,
        ] {
            let scheduler = Arc::clone(&scheduler);
            let config = config.clone();
            let mut rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.tick_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = run_sweep(&scheduler, sweep_type, &config).await {
                                tracing::warn!(sweep = %sweep_type, error = %e, "sweep tick failed");
                            }
                        }
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }
        SweepDriver { shutdown, handles }
    }

    /// Stop all sweep tasks and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Run one sweep tick to completion, returning the completed watermark
/// row. Public so tests and operators can drive sweeps deterministically.
#[instrument(skip(scheduler, config), err)]
pub async fn run_sweep(
    scheduler: &Arc<Scheduler>,
    sweep_type: SweepType,
    config: &SweepConfig,
) -> Result<SweepRunRow, SchedulerError> {
    let store = scheduler.store();
    let cutoff = match store.last_completed_sweep(sweep_type).await? {
        Some(run) => run.started_at - config.overlap_seconds,
        None => now_epoch() - config.fallback_window_seconds,
    };

    let run = store.start_sweep(sweep_type).await?;
    let candidates = store.executions_updated_since(cutoff).await?;

    let mut processed: i64 = 0;
    for execution_id in &candidates {
        match sweep_execution(scheduler, sweep_type, config, execution_id).await {
            Ok(true) => processed += 1,
            Ok(false) => {}
            // Per-execution trouble never stops the sweep.
            Err(e) => {
                tracing::warn!(
                    sweep = %sweep_type,
                    execution = execution_id.as_str(),
                    error = %e,
                    "sweep skipped execution"
                );
            }
        }
    }

    Ok(store.complete_sweep(run.id, processed).await?)
}

async fn sweep_execution(
    scheduler: &Arc<Scheduler>,
    sweep_type: SweepType,
    config: &SweepConfig,
    execution_id: &str,
) -> Result<bool, SchedulerError> {
    let store = scheduler.store();
    let Some(snapshot) = store.load_execution(execution_id).await? else {
        return Ok(false);
    };
    let Some(graph) = scheduler.graph_for(&snapshot) else {
        return Ok(false);
    };

    match sweep_type {
        SweepType::ScheduleFire => fire_schedules(scheduler, &graph, &snapshot).await,
        SweepType::AbandonedRevival => revive_abandoned(scheduler, &graph, &snapshot, config).await,
        SweepType::RecurringReschedule => {
            reschedule_recurring(scheduler, &graph, &snapshot).await
        }
    }
}

/// Kick `advance` when a timer moment has arrived and a downstream
/// consumer still has pending work for it.
async fn fire_schedules(
    scheduler: &Arc<Scheduler>,
    graph: &Graph,
    snapshot: &ExecutionSnapshot,
) -> Result<bool, SchedulerError> {
    let store = scheduler.store();
    let now = now_epoch();
    for node in graph.nodes() {
        if !node.node_type().is_timer() {
            continue;
        }
        let Some(row) = snapshot.value(&node.name) else {
            continue;
        };
        if !timer_arrived(row, now) {
            continue;
        }
        for dependent in graph.dependents_of(&node.name) {
            if store
                .active_computation_exists(snapshot.id(), &dependent.name, 0)
                .await?
            {
                Arc::clone(scheduler).advance(snapshot.id()).await?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Abandon `computing` rows past their deadline and re-queue them within
/// the retry budget.
async fn revive_abandoned(
    scheduler: &Arc<Scheduler>,
    graph: &Graph,
    snapshot: &ExecutionSnapshot,
    config: &SweepConfig,
) -> Result<bool, SchedulerError> {
    let store = scheduler.store();
    let stale = store
        .abandonable_computations(snapshot.id(), now_epoch() - config.abandon_grace_seconds)
        .await?;
    if stale.is_empty() {
        return Ok(false);
    }

    let mut revived = false;
    for row in stale {
        let Some(abandoned) = store.abandon_computation(row.id).await? else {
            continue;
        };
        tracing::warn!(
            execution = snapshot.id(),
            node = %abandoned.node_name,
            computation_id = abandoned.id,
            "abandoned stuck computation"
        );
        revived = true;

        let Some(node) = graph.node(&abandoned.node_name) else {
            continue;
        };
        let max_rev = recompute::max_upstream_revision(node, snapshot);
        let failures = store
            .count_failures_since(snapshot.id(), &abandoned.node_name, max_rev)
            .await?;
        let max_retries = node.policy().map(|p| p.max_retries).unwrap_or(1);
        if failures < max_retries {
            store
                .insert_pending_computation(
                    snapshot.id(),
                    &abandoned.node_name,
                    abandoned.computation_type,
                    abandoned.ex_revision_at_start,
                )
                .await?;
        }
    }

    if revived {
        Arc::clone(scheduler).advance(snapshot.id()).await?;
    }
    Ok(revived)
}

/// Queue the next tick of fired recurring timers once every dependent has
/// consumed the current one (no active computation at or above the
/// timer's revision).
async fn reschedule_recurring(
    scheduler: &Arc<Scheduler>,
    graph: &Graph,
    snapshot: &ExecutionSnapshot,
) -> Result<bool, SchedulerError> {
    let store = scheduler.store();
    let now = now_epoch();
    let mut rescheduled = false;

    for node in graph.nodes() {
        if node.node_type() != NodeType::ScheduleRecurring {
            continue;
        }
        let Some(row) = snapshot.value(&node.name) else {
            continue;
        };
        if !timer_arrived(row, now) {
            continue;
        }
        if store
            .active_computation_exists(snapshot.id(), &node.name, 0)
            .await?
        {
            continue;
        }

        let mut consumed = true;
        for dependent in graph.dependents_of(&node.name) {
            if store
                .active_computation_exists(snapshot.id(), &dependent.name, row.ex_revision)
                .await?
            {
                consumed = false;
                break;
            }
        }
        if !consumed {
            continue;
        }

        let max_rev = recompute::max_upstream_revision(node, snapshot);
        let inserted = store
            .insert_pending_computation(
                snapshot.id(),
                &node.name,
                crate::types::ComputationType::ScheduleRecurring,
                max_rev,
            )
            .await?;
        if inserted {
            tracing::debug!(
                execution = snapshot.id(),
                node = %node.name,
                "recurring timer rescheduled"
            );
            rescheduled = true;
        }
    }

    if rescheduled {
        Arc::clone(scheduler).advance(snapshot.id()).await?;
    }
    Ok(rescheduled)
}
