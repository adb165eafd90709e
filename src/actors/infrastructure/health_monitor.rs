use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::reply::{Reply, ReplyError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use crate::actors::core::{ComponentHealth, HealthCheckable, HealthStatus};

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health status of all components
// - Poll registered probes (the scheduler) on an interval
// - Accept pushed updates (the reconciliation actor after each sweep)
// - Aggregate system-wide health for /health
//
// ============================================================================

const PROBE_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

impl From<ComponentHealth> for UpdateHealth {
    fn from(health: ComponentHealth) -> Self {
        Self {
            component: health.name,
            status: health.status,
            details: health.details,
        }
    }
}

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

// Implement Reply for SystemHealth to use it as a message reply type
impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

#[derive(Default)]
pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    probes: Vec<Arc<dyn HealthCheckable>>,
}

impl HealthMonitorActor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll `probe` periodically for as long as the monitor runs.
    pub fn with_probe(mut self, probe: Arc<dyn HealthCheckable>) -> Self {
        self.probes.push(probe);
        self
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut degraded_components = Vec::new();
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(msg) => {
                    degraded_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Healthy => {}
            }
        }
        unhealthy_components.sort();
        degraded_components.sort();

        if !unhealthy_components.is_empty() {
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if !degraded_components.is_empty() {
            HealthStatus::Degraded(degraded_components.join(", "))
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(
        state: Self::Args,
        actor_ref: ActorRef<Self>
    ) -> Result<Self, Self::Error> {
        tracing::info!(probes = state.probes.len(), "HealthMonitorActor started");

        if !state.probes.is_empty() {
            let probes = state.probes.clone();
            let actor_ref_clone = actor_ref.clone();

            // Schedule periodic health checks
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PROBE_INTERVAL);
                loop {
                    interval.tick().await;

                    for probe in &probes {
                        // Fire and forget - use tell
                        let sent = actor_ref_clone
                            .tell(UpdateHealth::from(probe.check_health()))
                            .send()
                            .await;
                        if sent.is_err() {
                            tracing::debug!("Health monitor gone, stopping probes");
                            return;
                        }
                    }
                }
            });
        }

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let health = ComponentHealth {
            name: msg.component.clone(),
            status: msg.status.clone(),
            last_check: Utc::now(),
            details: msg.details,
        };

        let previous = self.components.insert(msg.component.clone(), health);
        let changed = previous.map_or(true, |p| p.status != msg.status);

        match &msg.status {
            HealthStatus::Healthy if changed => {
                tracing::info!(component = %msg.component, "Component healthy");
            }
            HealthStatus::Degraded(reason) if changed => {
                tracing::warn!(component = %msg.component, reason = %reason, "Component degraded");
            }
            HealthStatus::Unhealthy(reason) if changed => {
                tracing::error!(component = %msg.component, reason = %reason, "Component unhealthy");
            }
            _ => {
                tracing::debug!(component = %msg.component, status = ?msg.status, "Updated component health");
            }
        }
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let overall_status = self.compute_overall_status();

        SystemHealth {
            overall_status,
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}
