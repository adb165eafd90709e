use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, TimeDelta, Utc};

use super::aggregate::Order;
use super::dispatch::PartnerDispatcher;
use super::errors::OrderError;
use super::value_objects::{DeliveryPartner, OrderStatus};

// ============================================================================
// Status Transition Engine
// ============================================================================
//
// Pure state machine: given a freshly loaded order and the current time,
// move it one stage forward (or decide there is nothing to do). No I/O here;
// the scheduler persists whatever the engine produced.
//
// ============================================================================

/// Longest delay accepted for a stage gap or an initial schedule.
pub const MAX_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Convert a scheduling delay into a timestamp offset.
pub fn delay_offset(delay: Duration) -> Result<TimeDelta, OrderError> {
    if delay > MAX_DELAY {
        return Err(OrderError::DelayOutOfRange(delay));
    }
    TimeDelta::from_std(delay).map_err(|_| OrderError::DelayOutOfRange(delay))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Delivered or Cancelled
    Terminal(OrderStatus),
    AutoProgressDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advanced {
        from: OrderStatus,
        to: OrderStatus,
    },
    Skipped {
        reason: SkipReason,
        /// A stale `next_status_update` was cleared and must be persisted.
        cleared_schedule: bool,
    },
}

impl Transition {
    pub fn needs_persist(&self) -> bool {
        match self {
            Transition::Advanced { .. } => true,
            Transition::Skipped { cleared_schedule, .. } => *cleared_schedule,
        }
    }
}

pub struct TransitionEngine {
    stage_delay: TimeDelta,
    dispatcher: Arc<dyn PartnerDispatcher>,
}

impl TransitionEngine {
    pub fn new(stage_delay: Duration, dispatcher: Arc<dyn PartnerDispatcher>) -> Result<Self, OrderError> {
        Ok(Self {
            stage_delay: delay_offset(stage_delay)?,
            dispatcher,
        })
    }

    pub fn stage_delay(&self) -> TimeDelta {
        self.stage_delay
    }

    /// Advance `order` by exactly one stage, or skip.
    pub fn advance(&self, order: &mut Order, now: DateTime<Utc>) -> Transition {
        let skip_reason = if order.status.is_terminal() {
            Some(SkipReason::Terminal(order.status))
        } else if !order.auto_progress_enabled {
            Some(SkipReason::AutoProgressDisabled)
        } else {
            None
        };

        let next = match (skip_reason, order.status.next_stage()) {
            (None, Some(next)) => next,
            (reason, _) => {
                let cleared_schedule = order.next_status_update.take().is_some();
                if cleared_schedule {
                    order.updated_at = now;
                }
                return Transition::Skipped {
                    reason: reason.unwrap_or(SkipReason::Terminal(order.status)),
                    cleared_schedule,
                };
            }
        };

        let from = order.status;
        let mut note = format!("Status updated to {}", next);

        if next == OrderStatus::PartnerAssigned && order.delivery_partner.is_none() {
            let profile = self.dispatcher.select(order.id);
            note = format!("{} ({} is on the way)", note, profile.name);
            order.delivery_partner = Some(DeliveryPartner {
                name: profile.name,
                phone: profile.phone,
                vehicle_number: profile.vehicle_number,
                assigned_at: now,
            });
        }

        order.record_status(next, now, note);

        if next == OrderStatus::Delivered {
            order.delivered_at = Some(now);
            order.next_status_update = None;
        } else {
            order.next_status_update = Some(now + self.stage_delay);
        }

        Transition::Advanced { from, to: next }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::aggregate::tests::sample_new_order;
    use crate::domain::order::dispatch::{PartnerProfile, RosterDispatcher};
    use crate::domain::order::value_objects::STAGES;
    use chrono::TimeZone;

    fn engine() -> TransitionEngine {
        let dispatcher = RosterDispatcher::seeded(RosterDispatcher::default_roster(), 42).unwrap();
        TransitionEngine::new(Duration::from_secs(30), Arc::new(dispatcher)).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_walks_all_stages_in_order() {
        let engine = engine();
        let mut order = Order::place(sample_new_order(), t0());
        let mut now = t0();

        for expected in STAGES.iter().skip(1) {
            now += TimeDelta::seconds(30);
            let transition = engine.advance(&mut order, now);
            assert!(matches!(transition, Transition::Advanced { to, .. } if to == *expected));
            order.check_invariants().unwrap();
        }

        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.delivered_at, Some(now));
        assert!(order.next_status_update.is_none());
        let statuses: Vec<_> = order.status_history.iter().map(|e| e.status).collect();
        assert_eq!(statuses, STAGES.to_vec());
    }

    #[test]
    fn test_partner_assigned_once_with_timestamp() {
        let engine = engine();
        let mut order = Order::place(sample_new_order(), t0());
        let assigned_at = t0() + TimeDelta::seconds(30);

        engine.advance(&mut order, assigned_at);
        let partner = order.delivery_partner.clone().unwrap();
        assert_eq!(partner.assigned_at, assigned_at);
        assert!(order.status_history.last().unwrap().note.contains(&partner.name));

        engine.advance(&mut order, assigned_at + TimeDelta::seconds(30));
        engine.advance(&mut order, assigned_at + TimeDelta::seconds(60));
        assert_eq!(order.delivery_partner, Some(partner));
    }

    #[test]
    fn test_next_update_is_now_plus_stage_delay() {
        let engine = engine();
        let mut order = Order::place(sample_new_order(), t0());
        let now = t0() + TimeDelta::seconds(5);

        engine.advance(&mut order, now);
        assert_eq!(order.next_status_update, Some(now + TimeDelta::seconds(30)));
    }

    #[test]
    fn test_terminal_order_is_noop_and_clears_stale_schedule() {
        let engine = engine();
        let mut order = Order::place(sample_new_order(), t0());
        order.cancel(t0(), None).unwrap();
        // Simulate a stale schedule written by an older process
        order.next_status_update = Some(t0());
        let history_len = order.status_history.len();

        let transition = engine.advance(&mut order, t0());
        assert_eq!(
            transition,
            Transition::Skipped {
                reason: SkipReason::Terminal(OrderStatus::Cancelled),
                cleared_schedule: true,
            }
        );
        assert!(transition.needs_persist());
        assert!(order.next_status_update.is_none());
        assert_eq!(order.status_history.len(), history_len);

        let again = engine.advance(&mut order, t0());
        assert!(!again.needs_persist());
    }

    #[test]
    fn test_disabled_order_never_moves() {
        let engine = engine();
        let mut order = Order::place(sample_new_order(), t0());
        order.set_auto_progress(false, t0());

        let transition = engine.advance(&mut order, t0());
        assert!(matches!(
            transition,
            Transition::Skipped { reason: SkipReason::AutoProgressDisabled, .. }
        ));
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.status_history.len(), 1);
    }

    #[test]
    fn test_existing_partner_is_not_replaced() {
        let fixed = PartnerProfile::new("Fixed", "1", "AA 00 BB 0000");
        let engine = TransitionEngine::new(
            Duration::from_secs(30),
            Arc::new(RosterDispatcher::new(vec![fixed]).unwrap()),
        )
        .unwrap();
        let mut order = Order::place(sample_new_order(), t0());
        let preset = DeliveryPartner {
            name: "Preset".to_string(),
            phone: "2".to_string(),
            vehicle_number: "CC 11 DD 1111".to_string(),
            assigned_at: t0(),
        };
        order.delivery_partner = Some(preset.clone());

        engine.advance(&mut order, t0());
        assert_eq!(order.delivery_partner, Some(preset));
    }

    #[test]
    fn test_delay_offset_bounds() {
        assert_eq!(delay_offset(Duration::from_secs(30)).unwrap(), TimeDelta::seconds(30));
        assert!(delay_offset(MAX_DELAY + Duration::from_secs(1)).is_err());
    }
}
