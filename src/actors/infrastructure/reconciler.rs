use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use crate::actors::core::{HealthCheckable, HealthStatus};
use crate::scheduler::{Scheduler, SchedulerError, SweepReport};
use super::{HealthMonitorActor, UpdateHealth};

// ============================================================================
// Reconciliation Actor - periodic sweep for overdue orders
// ============================================================================
//
// The timer registry is empty after a restart and drops entries when a save
// fails. This actor heals both cases: on a fixed interval it asks the
// scheduler for every order whose persisted `next_status_update` has passed
// and fires it.
//
// Sweeps run inside the actor's message handler, so they never overlap.
// The first pass runs immediately on start.
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

/// Run a sweep now and return what it did.
#[derive(Debug)]
pub struct RunSweep;

/// Interval tick from the actor's own timer loop.
#[derive(Debug)]
struct Tick;

// ============================================================================
// Reconciliation Actor
// ============================================================================

pub struct ReconciliationActor {
    scheduler: Scheduler,
    interval: Duration,
    health_monitor: Option<ActorRef<HealthMonitorActor>>,
    sweeps_run: u64,
}

impl ReconciliationActor {
    pub fn new(scheduler: Scheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            health_monitor: None,
            sweeps_run: 0,
        }
    }

    /// Push sweep health to `monitor` after every pass.
    pub fn with_health_monitor(mut self, monitor: ActorRef<HealthMonitorActor>) -> Self {
        self.health_monitor = Some(monitor);
        self
    }

    async fn sweep(&mut self) -> Result<SweepReport, SchedulerError> {
        self.sweeps_run += 1;
        let result = self.scheduler.sweep().await;

        if let Err(ref e) = result {
            tracing::error!(sweep = self.sweeps_run, error = %e, "Reconciliation sweep failed");
        }

        if let Some(ref monitor) = self.health_monitor {
            let update = match &result {
                Ok(report) => UpdateHealth {
                    component: "reconciliation".to_string(),
                    status: HealthStatus::Healthy,
                    details: Some(format!(
                        "sweep {}: {} due, {} advanced, {} failed",
                        self.sweeps_run, report.due, report.advanced, report.failed
                    )),
                },
                Err(e) => UpdateHealth {
                    component: "reconciliation".to_string(),
                    status: HealthStatus::Unhealthy(e.to_string()),
                    details: None,
                },
            };

            // Fire and forget - use tell
            let _ = monitor.tell(update).send().await;
            let _ = monitor
                .tell(UpdateHealth::from(self.scheduler.check_health()))
                .send()
                .await;
        }

        result
    }
}

impl Actor for ReconciliationActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(
        state: Self::Args,
        actor_ref: ActorRef<Self>
    ) -> Result<Self, Self::Error> {
        tracing::info!(interval_secs = state.interval.as_secs(), "🔁 ReconciliationActor started");

        let period = state.interval;
        let actor_ref_clone = actor_ref.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                // Ask, not tell: the next tick waits for this sweep to finish
                if actor_ref_clone.ask(Tick).send().await.is_err() {
                    tracing::debug!("Reconciliation actor gone, stopping sweep loop");
                    break;
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<Tick> for ReconciliationActor {
    type Reply = ();

    async fn handle(&mut self, _msg: Tick, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        // Failures are logged and reported to the health monitor
        let _ = self.sweep().await;
    }
}

impl Message<RunSweep> for ReconciliationActor {
    type Reply = Result<SweepReport, SchedulerError>;

    async fn handle(&mut self, _msg: RunSweep, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::GetSystemHealth;
    use crate::clock::RuntimeClock;
    use crate::config::ProgressionConfig;
    use crate::domain::order::aggregate::tests::sample_new_order;
    use crate::domain::order::{Order, OrderStatus, RosterDispatcher, TransitionEngine};
    use crate::metrics::Metrics;
    use crate::store::{InMemoryOrderStore, OrderStore};
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn scheduler(store: Arc<InMemoryOrderStore>) -> Scheduler {
        let dispatcher = RosterDispatcher::seeded(RosterDispatcher::default_roster(), 1).unwrap();
        let engine = TransitionEngine::new(Duration::from_secs(30), Arc::new(dispatcher)).unwrap();
        Scheduler::new(
            store,
            engine,
            Arc::new(RuntimeClock::new()),
            Arc::new(Metrics::new().unwrap()),
            &ProgressionConfig::default(),
        )
    }

    async fn overdue_order(store: &InMemoryOrderStore, scheduler: &Scheduler) -> Order {
        let mut order = Order::place(sample_new_order(), scheduler.now());
        order.next_status_update = Some(scheduler.now() - TimeDelta::seconds(1));
        store.insert(&order).await.unwrap();
        order
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_recovers_overdue_orders() {
        let store = Arc::new(InMemoryOrderStore::new());
        let scheduler = scheduler(store.clone());
        let order = overdue_order(&store, &scheduler).await;

        let actor = ReconciliationActor::spawn(ReconciliationActor::new(
            scheduler.clone(),
            Duration::from_secs(15),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let after = store.load(order.id).await.unwrap().unwrap();
        assert_eq!(after.status, OrderStatus::PartnerAssigned);
        let _ = actor.stop_gracefully().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweep_reports_to_health_monitor() {
        let store = Arc::new(InMemoryOrderStore::new());
        let scheduler = scheduler(store.clone());
        let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new());
        // Long interval: only the startup pass runs on its own
        let actor = ReconciliationActor::spawn(
            ReconciliationActor::new(scheduler.clone(), Duration::from_secs(3600))
                .with_health_monitor(monitor.clone()),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        overdue_order(&store, &scheduler).await;
        let report = actor.ask(RunSweep).send().await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.advanced, 1);

        let health = monitor.ask(GetSystemHealth).send().await.unwrap();
        assert!(health.overall_status.is_healthy());
        assert!(health.components.contains_key("reconciliation"));
        assert!(health.components.contains_key("scheduler"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_marks_reconciliation_unhealthy() {
        let store = Arc::new(InMemoryOrderStore::new());
        let scheduler = scheduler(store.clone());
        let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new());
        let actor = ReconciliationActor::spawn(
            ReconciliationActor::new(scheduler, Duration::from_secs(3600))
                .with_health_monitor(monitor.clone()),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        store.set_unavailable(true);
        assert!(actor.ask(RunSweep).send().await.is_err());

        let health = monitor.ask(GetSystemHealth).send().await.unwrap();
        assert!(health.overall_status.is_unhealthy());
    }
}
