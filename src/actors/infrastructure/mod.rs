// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Long-running infrastructure concerns:
// - Health monitoring
// - Reconciliation sweeps
//
// ============================================================================

// Private module declarations
mod health_monitor;
mod reconciler;

// Re-export for public API
pub use health_monitor::{HealthMonitorActor, UpdateHealth, GetSystemHealth, SystemHealth};
pub use reconciler::{ReconciliationActor, RunSweep};
