// ============================================================================
// Progression Scheduler
// ============================================================================
//
// Owns the in-memory timer registry and runs every transition step:
//
//   schedule ──► persist next_status_update ──► arm timer
//   timer fire / sweep hit ──► reload ──► engine.advance ──► save (CAS) ──► re-arm
//   manual trigger ──► same step, without the due check
//
// The persisted order is authoritative; the registry is disposable and empty
// after every restart. Racing triggers are safe because each step reloads
// the order and saves with a version check: the loser observes `Conflict`
// and reports `Superseded` instead of applying the stage twice.
//
// ============================================================================

mod dead_letter;
mod outcome;
mod registry;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use outcome::{ScheduleOutcome, StepOutcome, StepReport, SweepReport};
pub use registry::TimerRegistry;

use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use uuid::Uuid;

use crate::actors::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::clock::Clock;
use crate::config::ProgressionConfig;
use crate::domain::order::{
    delay_offset, Order, OrderError, OrderStatus, SkipReason, Transition, TransitionEngine, STAGES,
};
use crate::metrics::Metrics;
use crate::store::{OrderStore, StoreError};

/// Reloads attempted when a concurrent writer bumps the version without
/// moving the order to another stage.
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Order {0} not found")]
    NotFound(Uuid),

    #[error("Failed to persist order {order_id}: {source}")]
    Persistence {
        order_id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    /// Timer fire or sweep hit: only advance once `next_status_update` has passed.
    Due,
    /// Operator trigger: advance regardless of schedule.
    Forced,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn OrderStore>,
    engine: TransitionEngine,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    timers: TimerRegistry,
    dead_letters: DeadLetterQueue,
    sweep_concurrency: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        engine: TransitionEngine,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        config: &ProgressionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                engine,
                clock,
                metrics,
                timers: TimerRegistry::new(),
                dead_letters: DeadLetterQueue::new(config.dead_letter_threshold),
                sweep_concurrency: config.sweep_concurrency.max(1),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.inner.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Persist `next_status_update = now + initial_delay` and arm the timer,
    /// replacing any timer already pending for the order.
    pub async fn schedule(
        &self,
        order_id: Uuid,
        initial_delay: Duration,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        let offset = delay_offset(initial_delay)?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut order = self.load(order_id).await?;

            if let Some(reason) = inactive_reason(&order) {
                tracing::info!(order_id = %order_id, reason = ?reason, "Order not eligible for progression, skipping");
                return Ok(ScheduleOutcome::Skipped(reason));
            }

            let now = self.now();
            let due_at = now + offset;
            order.next_status_update = Some(due_at);
            order.updated_at = now;

            match self.inner.store.save(&order).await {
                Ok(_) => {
                    self.arm(order_id, due_at);
                    tracing::info!(
                        order_id = %order_id,
                        status = %order.status,
                        due_at = %due_at,
                        "Progression scheduled"
                    );
                    return Ok(ScheduleOutcome::Scheduled { due_at });
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(order_id = %order_id, attempt, "Order changed while scheduling, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run one step immediately, ignoring the schedule. Re-arms for whatever
    /// the step produced.
    pub async fn manual_trigger(&self, order_id: Uuid) -> Result<StepReport, SchedulerError> {
        tracing::info!(order_id = %order_id, "Manual progression trigger");
        let report = self.step(order_id, StepMode::Forced).await?;
        self.rearm_after(order_id, &report);
        Ok(report)
    }

    /// Scan for overdue orders and fire each one as if its timer had expired.
    pub async fn sweep(&self) -> Result<SweepReport, SchedulerError> {
        let now = self.now();
        let overdue = self.inner.store.find_due(now).await?;
        self.inner.metrics.sweeps_total.inc();

        let mut report = SweepReport {
            due: overdue.len(),
            ..SweepReport::default()
        };

        let candidates: Vec<Uuid> = overdue
            .into_iter()
            .map(|order| order.id)
            .filter(|order_id| {
                let parked = self.inner.dead_letters.is_dead_lettered(*order_id);
                if parked {
                    report.dead_lettered += 1;
                }
                !parked
            })
            .collect();

        let results: Vec<Result<StepReport, SchedulerError>> = stream::iter(candidates)
            .map(|order_id| self.drive(order_id))
            .buffer_unordered(self.inner.sweep_concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(step) if matches!(step.outcome, StepOutcome::Advanced { .. }) => report.advanced += 1,
                Ok(_) => report.noop += 1,
                Err(_) => report.failed += 1,
            }
        }

        self.inner.metrics.record_sweep_outcome("advanced", report.advanced);
        self.inner.metrics.record_sweep_outcome("noop", report.noop);
        self.inner.metrics.record_sweep_outcome("failed", report.failed);
        self.inner.metrics.record_sweep_outcome("dead_lettered", report.dead_lettered);

        if report.due > 0 {
            tracing::info!(
                due = report.due,
                advanced = report.advanced,
                noop = report.noop,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "Reconciliation sweep recovered overdue orders"
            );
        } else {
            tracing::debug!("Reconciliation sweep found nothing overdue");
        }

        Ok(report)
    }

    // ========================================================================
    // Timer Management
    // ========================================================================

    pub fn cancel_timer(&self, order_id: Uuid) -> bool {
        let cancelled = self.inner.timers.cancel(order_id);
        if cancelled {
            tracing::debug!(order_id = %order_id, "Pending timer cancelled");
        }
        self.inner.metrics.set_active_timers(self.inner.timers.len());
        cancelled
    }

    pub fn active_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// When the pending timer for `order_id` is due, if one is armed.
    pub fn timer_due_at(&self, order_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.timers.due_at(order_id)
    }

    /// Abort every pending timer. Persisted schedules survive for the next
    /// process to pick up through the sweep.
    pub fn shutdown(&self) {
        let aborted = self.inner.timers.cancel_all();
        self.inner.metrics.set_active_timers(0);
        tracing::info!(aborted, "🛑 Scheduler stopped, pending timers aborted");
    }

    // ========================================================================
    // Dead Letters
    // ========================================================================

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.list()
    }

    /// Make every parked order eligible for the sweep again.
    pub fn recover_dead_letters(&self) -> Vec<Uuid> {
        let recovered = self.inner.dead_letters.recover_all();
        self.inner.metrics.set_dead_letters(self.inner.dead_letters.dead_lettered_count());
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "Dead-lettered orders re-admitted to the sweep");
        }
        recovered
    }

    /// Drop the pending timer and any failure streak of an order that has
    /// left progression (cancelled or auto-progress disabled).
    pub fn forget(&self, order_id: Uuid) {
        self.cancel_timer(order_id);
        if self.inner.dead_letters.clear(order_id) {
            tracing::info!(order_id = %order_id, "Failure streak dropped, order left progression");
        }
        self.inner.metrics.set_dead_letters(self.inner.dead_letters.dead_lettered_count());
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load(&self, order_id: Uuid) -> Result<Order, SchedulerError> {
        self.inner
            .store
            .load(order_id)
            .await?
            .ok_or(SchedulerError::NotFound(order_id))
    }

    fn arm(&self, order_id: Uuid, due_at: DateTime<Utc>) {
        // Past-due deadlines fire on the next runtime tick
        let delay = (due_at - self.now()).to_std().unwrap_or(Duration::ZERO);
        let scheduler = self.clone();

        let replaced = self.inner.timers.arm(order_id, due_at, move |generation| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if scheduler.inner.timers.release(order_id, generation) {
                    scheduler.inner.metrics.set_active_timers(scheduler.inner.timers.len());
                    scheduler.on_timer_fire(order_id).await;
                }
            })
        });

        if replaced {
            tracing::debug!(order_id = %order_id, "Replaced pending timer");
        }
        tracing::debug!(order_id = %order_id, delay_ms = delay.as_millis() as u64, "Timer armed");
        self.inner.metrics.set_active_timers(self.inner.timers.len());
    }

    async fn on_timer_fire(&self, order_id: Uuid) {
        match self.drive(order_id).await {
            Ok(report) => {
                tracing::debug!(order_id = %order_id, outcome = ?report.outcome, "Timer step finished");
            }
            Err(SchedulerError::Persistence { .. }) => {
                // Already logged; the sweep retries from the persisted schedule
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Timer step failed");
            }
        }
    }

    /// Due-checked step, repeated while the next stage is already due, then
    /// arm for whatever remains.
    async fn drive(&self, order_id: Uuid) -> Result<StepReport, SchedulerError> {
        let mut report = self.step(order_id, StepMode::Due).await?;

        for _ in 0..STAGES.len() {
            match report.next_due() {
                Some(due_at) if due_at <= self.now() => {
                    tracing::debug!(order_id = %order_id, "Next stage already due, running immediately");
                    report = self.step(order_id, StepMode::Due).await?;
                }
                _ => break,
            }
        }

        self.rearm_after(order_id, &report);
        Ok(report)
    }

    fn rearm_after(&self, order_id: Uuid, report: &StepReport) {
        match report.next_due() {
            Some(due_at) => self.arm(order_id, due_at),
            None => {
                self.cancel_timer(order_id);
            }
        }
    }

    /// Reload, transition, persist. Exactly one stage at most.
    ///
    /// A forced step that loses the version check to a write which left the
    /// stage alone reloads and tries again. Otherwise the winner's stage stands.
    async fn step(&self, order_id: Uuid, mode: StepMode) -> Result<StepReport, SchedulerError> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_step(order_id, mode, started).await? {
                Attempt::Done(report) => return Ok(report),
                Attempt::Conflicted { from, current } => {
                    let stage_unchanged = current.status == from;
                    if mode == StepMode::Forced && stage_unchanged && attempt < MAX_WRITE_ATTEMPTS {
                        tracing::debug!(order_id = %order_id, attempt, "Order changed during manual step, reloading");
                        continue;
                    }
                    tracing::warn!(
                        order_id = %order_id,
                        from = %from,
                        current = %current.status,
                        "Order changed underneath this trigger, leaving the stage to the winner"
                    );
                    return Ok(StepReport {
                        outcome: StepOutcome::Superseded,
                        order: current,
                    });
                }
            }
        }
    }

    async fn try_step(
        &self,
        order_id: Uuid,
        mode: StepMode,
        started: Instant,
    ) -> Result<Attempt, SchedulerError> {
        let mut order = self.load(order_id).await?;
        let from = order.status;
        let now = self.now();

        if mode == StepMode::Due && order.is_active() {
            match order.next_status_update {
                Some(due_at) if due_at > now => {
                    tracing::debug!(order_id = %order_id, due_at = %due_at, "Trigger arrived before due time");
                    return Ok(Attempt::Done(StepReport {
                        outcome: StepOutcome::NotDue { due_at },
                        order,
                    }));
                }
                None => {
                    tracing::debug!(order_id = %order_id, "Order has no pending schedule");
                    return Ok(Attempt::Done(StepReport {
                        outcome: StepOutcome::Unscheduled,
                        order,
                    }));
                }
                Some(_) => {}
            }
        }

        let transition = self.inner.engine.advance(&mut order, now);

        if transition.needs_persist() {
            match self.inner.store.save(&order).await {
                Ok(version) => order.version = version,
                Err(StoreError::Conflict { expected, actual, .. }) => {
                    tracing::debug!(order_id = %order_id, expected, actual, "Version check lost");
                    let current = self.load(order_id).await?;
                    return Ok(Attempt::Conflicted { from, current });
                }
                Err(e) => return Err(self.persistence_failed(order_id, e)),
            }
        }

        if self.inner.dead_letters.clear(order_id) {
            tracing::info!(order_id = %order_id, "Order persisted again, failure streak cleared");
            self.inner.metrics.set_dead_letters(self.inner.dead_letters.dead_lettered_count());
        }

        let outcome = match transition {
            Transition::Advanced { from, to } => {
                self.inner
                    .metrics
                    .record_transition(from.label(), to.label(), started.elapsed().as_secs_f64());
                tracing::info!(
                    order_id = %order_id,
                    from = %from,
                    to = %to,
                    next_status_update = ?order.next_status_update,
                    "Order advanced"
                );
                StepOutcome::Advanced { from, to }
            }
            Transition::Skipped { reason, cleared_schedule } => {
                tracing::info!(
                    order_id = %order_id,
                    reason = ?reason,
                    cleared_schedule,
                    "Transition skipped"
                );
                StepOutcome::Skipped(reason)
            }
        };

        Ok(Attempt::Done(StepReport { outcome, order }))
    }

    fn persistence_failed(&self, order_id: Uuid, error: StoreError) -> SchedulerError {
        self.inner.metrics.record_transition_failure(error.kind());

        let parked = self
            .inner
            .dead_letters
            .record_failure(order_id, &error.to_string(), self.now());
        if parked {
            tracing::error!(
                order_id = %order_id,
                threshold = self.inner.dead_letters.threshold(),
                error = %error,
                "💀 Order dead-lettered after repeated persistence failures"
            );
            self.inner.metrics.set_dead_letters(self.inner.dead_letters.dead_lettered_count());
        } else {
            tracing::error!(
                order_id = %order_id,
                error = %error,
                "Failed to persist transition, sweep will retry"
            );
        }

        SchedulerError::Persistence { order_id, source: error }
    }
}

enum Attempt {
    Done(StepReport),
    /// Lost the version check; `current` is the reloaded winner.
    Conflicted { from: OrderStatus, current: Order },
}

fn inactive_reason(order: &Order) -> Option<SkipReason> {
    if order.status.is_terminal() {
        Some(SkipReason::Terminal(order.status))
    } else if !order.auto_progress_enabled {
        Some(SkipReason::AutoProgressDisabled)
    } else {
        None
    }
}

impl HealthCheckable for Scheduler {
    fn check_health(&self) -> ComponentHealth {
        let parked = self.inner.dead_letters.dead_lettered_count();
        let status = if parked > 0 {
            HealthStatus::Degraded(format!("{} orders dead-lettered", parked))
        } else {
            HealthStatus::Healthy
        };

        ComponentHealth::new(self.component_name(), status)
            .with_details(format!("{} active timers", self.active_timers()))
    }

    fn component_name(&self) -> &str {
        "scheduler"
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
