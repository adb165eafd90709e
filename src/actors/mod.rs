// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for asynchronous, concurrent operations.
//
// Structure:
// - core/           - Health types and the HealthCheckable trait
// - infrastructure/ - Concrete infrastructure actors (Health, Reconciliation)
//
// Note: Order progression itself lives in the scheduler, NOT in actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

// Private module declarations
mod core;
mod infrastructure;

pub use core::{HealthStatus, ComponentHealth, HealthCheckable};
pub use infrastructure::{
    HealthMonitorActor,
    UpdateHealth,
    GetSystemHealth,
    SystemHealth,
    ReconciliationActor,
    RunSweep,
};
