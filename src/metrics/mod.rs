// Private module declaration
mod server;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Stage transitions (throughput, latency, failures)
// - Reconciliation sweeps and what they recovered
// - Timer registry size
// - Dead-lettered orders
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the progression service
pub struct Metrics {
    registry: Registry,

    // Transition Metrics
    pub transitions_total: IntCounterVec,
    pub transition_failures: IntCounterVec,
    pub transition_duration: Histogram,

    // Reconciliation Metrics
    pub sweeps_total: IntCounter,
    pub sweep_orders: IntCounterVec,

    // Scheduler Metrics
    pub active_timers: IntGauge,
    pub dead_letter_orders: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Transition Metrics
        let transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Total order stage transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let transition_failures = IntCounterVec::new(
            Opts::new("order_transition_failures_total", "Transition attempts that could not be persisted"),
            &["reason"],
        )?;
        registry.register(Box::new(transition_failures.clone()))?;

        let transition_duration = Histogram::with_opts(
            HistogramOpts::new("order_transition_duration_seconds", "Reload + transition + persist duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(transition_duration.clone()))?;

        // Reconciliation Metrics
        let sweeps_total = IntCounter::new(
            "reconciliation_sweeps_total",
            "Total reconciliation sweep passes",
        )?;
        registry.register(Box::new(sweeps_total.clone()))?;

        let sweep_orders = IntCounterVec::new(
            Opts::new("reconciliation_orders_total", "Overdue orders handled by sweeps, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(sweep_orders.clone()))?;

        // Scheduler Metrics
        let active_timers = IntGauge::new(
            "scheduler_active_timers",
            "Armed in-memory progression timers",
        )?;
        registry.register(Box::new(active_timers.clone()))?;

        let dead_letter_orders = IntGauge::new(
            "dead_letter_orders",
            "Orders parked after repeated persistence failures",
        )?;
        registry.register(Box::new(dead_letter_orders.clone()))?;

        Ok(Self {
            registry,
            transitions_total,
            transition_failures,
            transition_duration,
            sweeps_total,
            sweep_orders,
            active_timers,
            dead_letter_orders,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, from: &str, to: &str, duration_secs: f64) {
        self.transitions_total.with_label_values(&[from, to]).inc();
        self.transition_duration.observe(duration_secs);
    }

    pub fn record_transition_failure(&self, reason: &str) {
        self.transition_failures.with_label_values(&[reason]).inc();
    }

    pub fn record_sweep_outcome(&self, outcome: &str, count: usize) {
        self.sweep_orders.with_label_values(&[outcome]).inc_by(count as u64);
    }

    pub fn set_active_timers(&self, count: usize) {
        self.active_timers.set(count as i64);
    }

    pub fn set_dead_letters(&self, count: usize) {
        self.dead_letter_orders.set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_transition() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transition("Processing", "Delivery Partner Assigned", 0.002);
        metrics.record_transition("Delivery Partner Assigned", "Shipped", 0.003);

        let gathered = metrics.registry.gather();
        let transitions = gathered.iter().find(|m| m.name() == "order_transitions_total").unwrap();
        assert_eq!(transitions.metric.len(), 2); // Two different label pairs
    }

    #[test]
    fn test_record_sweep_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.sweeps_total.inc();
        metrics.record_sweep_outcome("advanced", 3);

        let gathered = metrics.registry.gather();
        let orders = gathered.iter().find(|m| m.name() == "reconciliation_orders_total").unwrap();
        assert_eq!(orders.metric[0].counter.value, Some(3.0));
    }

    #[test]
    fn test_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.set_active_timers(4);
        metrics.set_dead_letters(1);

        let gathered = metrics.registry.gather();
        let timers = gathered.iter().find(|m| m.name() == "scheduler_active_timers").unwrap();
        assert_eq!(timers.metric[0].gauge.value, Some(4.0));
    }
}
