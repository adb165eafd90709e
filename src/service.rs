use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ProgressionConfig;
use crate::domain::order::{
    delay_offset, Order, OrderError, OrderStatus, PartnerDispatcher, StatusEntry, TransitionEngine,
};
use crate::metrics::Metrics;
use crate::scheduler::{DeadLetter, ScheduleOutcome, Scheduler, SchedulerError};
use crate::store::{OrderStore, StoreError};

// ============================================================================
// Progression Service - public control surface
// ============================================================================
//
// What collaborators call:
// - payment confirmation  -> start_progression / handle_order_placed
// - operators and tests   -> force_progress, cancel_order, set_auto_progress,
//                            dead_letters, recover_dead_letters
// - polling clients       -> order_status, query_active_orders
//
// ============================================================================

const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Progression state of one order, as a polling client sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub status: OrderStatus,
    pub status_history: Vec<StatusEntry>,
    pub next_status_update: Option<DateTime<Utc>>,
}

impl From<&Order> for ProgressSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            status: order.status,
            status_history: order.status_history.clone(),
            next_status_update: order.next_status_update,
        }
    }
}

/// Row of the operational "what is still moving" view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveOrderView {
    pub id: Uuid,
    pub status: OrderStatus,
    pub next_status_update: Option<DateTime<Utc>>,
    pub status_history: Vec<StatusEntry>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ProgressionService {
    scheduler: Scheduler,
    initial_delay: Duration,
}

impl ProgressionService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        dispatcher: Arc<dyn PartnerDispatcher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        config: &ProgressionConfig,
    ) -> Result<Self, OrderError> {
        delay_offset(config.initial_delay)?;
        let engine = TransitionEngine::new(config.stage_delay, dispatcher)?;

        Ok(Self {
            scheduler: Scheduler::new(store, engine, clock, metrics, config),
            initial_delay: config.initial_delay,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Start automatic progression after payment confirmation.
    ///
    /// Safe to repeat: a second call replaces the pending timer. Errors are
    /// logged, never returned; the sweep covers anything that was persisted.
    pub async fn start_progression(&self, order_id: Uuid) {
        match self.scheduler.schedule(order_id, self.initial_delay).await {
            Ok(ScheduleOutcome::Scheduled { due_at }) => {
                tracing::debug!(order_id = %order_id, due_at = %due_at, "Progression started");
            }
            Ok(ScheduleOutcome::Skipped(reason)) => {
                tracing::info!(order_id = %order_id, reason = ?reason, "Progression not started");
            }
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "Failed to start progression");
            }
        }
    }

    /// Entry point for the order-creation collaborator. Progression only
    /// starts once payment is confirmed; returns whether it did.
    pub async fn handle_order_placed(&self, order_id: Uuid) -> Result<bool, SchedulerError> {
        let order = self.load(order_id).await?;

        if !order.payment_info.is_confirmed() {
            tracing::info!(
                order_id = %order_id,
                payment_status = %order.payment_info.status,
                "Payment not confirmed, progression deferred"
            );
            return Ok(false);
        }

        self.start_progression(order_id).await;
        Ok(true)
    }

    /// Advance one stage now, regardless of schedule.
    pub async fn force_progress(&self, order_id: Uuid) -> Result<ProgressSnapshot, SchedulerError> {
        let report = self.scheduler.manual_trigger(order_id).await?;
        Ok(ProgressSnapshot::from(&report.order))
    }

    pub async fn order_status(&self, order_id: Uuid) -> Result<ProgressSnapshot, SchedulerError> {
        let order = self.load(order_id).await?;
        Ok(ProgressSnapshot::from(&order))
    }

    /// Non-terminal, auto-progressing orders, newest first. Read-only.
    pub async fn query_active_orders(&self) -> Result<Vec<ActiveOrderView>, SchedulerError> {
        let mut orders = self.scheduler.store().find_active().await?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(orders
            .into_iter()
            .map(|order| ActiveOrderView {
                id: order.id,
                status: order.status,
                next_status_update: order.next_status_update,
                status_history: order.status_history,
                created_at: order.created_at,
            })
            .collect())
    }

    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<&str>,
    ) -> Result<ProgressSnapshot, SchedulerError> {
        let order = self
            .update(order_id, |order, now| order.cancel(now, reason))
            .await?;
        self.scheduler.forget(order_id);

        tracing::info!(order_id = %order_id, reason = ?reason, "Order cancelled");
        Ok(ProgressSnapshot::from(&order))
    }

    /// Disabling disarms the order for good; re-enabling schedules the next
    /// stage after the initial delay.
    pub async fn set_auto_progress(
        &self,
        order_id: Uuid,
        enabled: bool,
    ) -> Result<ProgressSnapshot, SchedulerError> {
        let order = self
            .update(order_id, |order, now| {
                order.set_auto_progress(enabled, now);
                Ok(())
            })
            .await?;

        tracing::info!(order_id = %order_id, enabled, "Auto-progress toggled");

        if !enabled || !order.is_active() {
            self.scheduler.forget(order_id);
            return Ok(ProgressSnapshot::from(&order));
        }

        self.scheduler.schedule(order_id, self.initial_delay).await?;
        self.order_status(order_id).await
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.scheduler.dead_letters()
    }

    /// Re-admit parked orders; the next sweep retries them.
    pub fn recover_dead_letters(&self) -> usize {
        self.scheduler.recover_dead_letters().len()
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, SchedulerError> {
        self.scheduler
            .store()
            .load(order_id)
            .await?
            .ok_or(SchedulerError::NotFound(order_id))
    }

    /// Load, mutate, save; reloads when another writer got there first.
    async fn update<F>(&self, order_id: Uuid, mutate: F) -> Result<Order, SchedulerError>
    where
        F: Fn(&mut Order, DateTime<Utc>) -> Result<(), OrderError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut order = self.load(order_id).await?;
            mutate(&mut order, self.scheduler.now())?;

            match self.scheduler.store().save(&order).await {
                Ok(version) => {
                    order.version = version;
                    return Ok(order);
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_UPDATE_ATTEMPTS => {
                    tracing::debug!(order_id = %order_id, attempt, "Order changed during update, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
