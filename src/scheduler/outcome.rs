use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::order::{Order, OrderStatus, SkipReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { due_at: DateTime<Utc> },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced { from: OrderStatus, to: OrderStatus },
    /// Terminal or auto-progress disabled.
    Skipped(SkipReason),
    /// Reloaded schedule is still in the future.
    NotDue { due_at: DateTime<Utc> },
    /// Active order with nothing scheduled.
    Unscheduled,
    /// Another trigger persisted this order first.
    Superseded,
}

/// Result of one step plus the order as it now stands in the store.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub outcome: StepOutcome,
    pub order: Order,
}

impl StepReport {
    /// When the following step should run, if the order still progresses.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        if self.order.is_active() {
            self.order.next_status_update
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Overdue orders the scan returned
    pub due: usize,
    pub advanced: usize,
    /// Skipped, superseded or not yet due after reload
    pub noop: usize,
    pub failed: usize,
    /// Parked orders left alone
    pub dead_lettered: usize,
}
