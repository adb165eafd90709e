// ============================================================================
// Order Fulfillment Progression
// ============================================================================
//
// Moves paid orders through Processing -> Delivery Partner Assigned ->
// Shipped -> Delivered on a timer, persisting every step and healing missed
// timers with a periodic reconciliation sweep.
//
// Layout:
// - domain/     - order record, stage state machine, partner dispatch (no I/O)
// - store/      - OrderStore trait, in-memory and ScyllaDB implementations
// - scheduler/  - timer registry, transition steps, sweep, dead letters
// - service     - public control surface
// - actors/     - kameo infrastructure actors (health, reconciliation)
// - metrics/    - Prometheus registry and HTTP endpoint
//
// ============================================================================

pub mod actors;
pub mod clock;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, RuntimeClock, SystemClock};
pub use config::{AppConfig, ConfigError, ProgressionConfig};
pub use scheduler::{Scheduler, SchedulerError, SweepReport};
pub use service::{ActiveOrderView, ProgressSnapshot, ProgressionService};
