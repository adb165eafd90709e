use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::value_objects::{
    DeliveryPartner, OrderItem, OrderStatus, PaymentInfo, ShippingInfo, StatusEntry,
};
use super::errors::OrderError;

// ============================================================================
// Order Record - the entity the progression scheduler mutates
// ============================================================================
//
// Invariants (checked by `check_invariants`):
// - status_history is never empty and ends with the current status
// - history stages only move forward; Cancelled may only close the history
// - next_status_update is only set while the order is active
// - a delivery partner is present from PartnerAssigned onwards
// - delivered_at is set exactly when the order is Delivered
//
// ============================================================================

/// What the order-creation collaborator hands over.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub items: Vec<OrderItem>,
    pub shipping_info: ShippingInfo,
    pub payment_info: PaymentInfo,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub version: i64,
    pub tracking_id: String,

    // Progression state
    pub status: OrderStatus,
    pub status_history: Vec<StatusEntry>,
    pub auto_progress_enabled: bool,
    pub next_status_update: Option<DateTime<Utc>>,
    pub delivery_partner: Option<DeliveryPartner>,
    pub delivered_at: Option<DateTime<Utc>>,

    // Purchase details
    pub items: Vec<OrderItem>,
    pub shipping_info: ShippingInfo,
    pub payment_info: PaymentInfo,
    pub total_cents: i64,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a freshly placed order in `Processing`, auto-progress on, nothing scheduled.
    pub fn place(new_order: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 0,
            tracking_id: generate_tracking_id(now),
            status: OrderStatus::Processing,
            status_history: vec![StatusEntry::new(OrderStatus::Processing, now, "Order placed")],
            auto_progress_enabled: true,
            next_status_update: None,
            delivery_partner: None,
            delivered_at: None,
            items: new_order.items,
            shipping_info: new_order.shipping_info,
            payment_info: new_order.payment_info,
            total_cents: new_order.total_cents,
            created_at: now,
            updated_at: now,
        }
    }

    /// Non-terminal and still allowed to progress automatically.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal() && self.auto_progress_enabled
    }

    /// Move to `status` and append the matching history entry.
    pub(crate) fn record_status(&mut self, status: OrderStatus, now: DateTime<Utc>, note: String) {
        self.status = status;
        self.status_history.push(StatusEntry::new(status, now, note));
        self.updated_at = now;
    }

    /// Out-of-band cancellation. Terminal for the scheduler from here on.
    pub fn cancel(&mut self, now: DateTime<Utc>, reason: Option<&str>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Delivered => return Err(OrderError::AlreadyDelivered(self.id)),
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled(self.id)),
            _ => {}
        }

        let note = match reason {
            Some(reason) => format!("Order cancelled: {}", reason),
            None => "Order cancelled".to_string(),
        };
        self.record_status(OrderStatus::Cancelled, now, note);
        self.next_status_update = None;
        Ok(())
    }

    /// Toggle automatic progression. Disabling drops any pending schedule.
    pub fn set_auto_progress(&mut self, enabled: bool, now: DateTime<Utc>) {
        self.auto_progress_enabled = enabled;
        if !enabled {
            self.next_status_update = None;
        }
        self.updated_at = now;
    }

    pub fn check_invariants(&self) -> Result<(), OrderError> {
        let violation = |reason: &str| OrderError::InvariantViolation {
            order_id: self.id,
            reason: reason.to_string(),
        };

        let last = self
            .status_history
            .last()
            .ok_or_else(|| violation("status history is empty"))?;
        if last.status != self.status {
            return Err(violation("last history entry does not match current status"));
        }

        let mut previous_stage: Option<usize> = None;
        for (position, entry) in self.status_history.iter().enumerate() {
            match entry.status.stage_index() {
                Some(stage) => {
                    if previous_stage.is_some_and(|prev| stage <= prev) {
                        return Err(violation("history stages are repeated or out of order"));
                    }
                    previous_stage = Some(stage);
                }
                None => {
                    if position + 1 != self.status_history.len() {
                        return Err(violation("cancellation is not the last history entry"));
                    }
                }
            }
        }

        if self.next_status_update.is_some() && !self.is_active() {
            return Err(violation("next_status_update set on an inactive order"));
        }

        if self.status.requires_partner() && self.delivery_partner.is_none() {
            return Err(violation("delivery partner missing"));
        }
        if self.status == OrderStatus::Processing && self.delivery_partner.is_some() {
            return Err(violation("delivery partner assigned while processing"));
        }

        if self.delivered_at.is_some() != (self.status == OrderStatus::Delivered) {
            return Err(violation("delivered_at does not match status"));
        }

        Ok(())
    }
}

/// `OI` + creation millis + five random uppercase alphanumerics.
fn generate_tracking_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("OI{}{}", now.timestamp_millis(), suffix)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::order::value_objects::PaymentMethod;

    pub(crate) fn sample_new_order() -> NewOrder {
        NewOrder {
            items: vec![OrderItem {
                product_id: Uuid::new_v4(),
                name: "Test Product".to_string(),
                quantity: 1,
                unit_price_cents: 10_000,
            }],
            shipping_info: ShippingInfo {
                name: "Test User".to_string(),
                phone: "1234567890".to_string(),
                address: "Test Address".to_string(),
                city: "Test City".to_string(),
                state: "Test State".to_string(),
                pincode: "123456".to_string(),
                landmark: None,
            },
            payment_info: PaymentInfo {
                id: "test_payment".to_string(),
                method: PaymentMethod::Razorpay,
                status: "succeeded".to_string(),
            },
            total_cents: 11_000,
        }
    }

    #[test]
    fn test_placed_order_starts_processing() {
        let now = Utc::now();
        let order = Order::place(sample_new_order(), now);

        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.status_history.len(), 1);
        assert!(order.auto_progress_enabled);
        assert!(order.next_status_update.is_none());
        assert!(order.delivery_partner.is_none());
        assert!(order.tracking_id.starts_with("OI"));
        assert_eq!(order.tracking_id.len(), 2 + now.timestamp_millis().to_string().len() + 5);
        order.check_invariants().unwrap();
    }

    #[test]
    fn test_cancel_appends_history_and_clears_schedule() {
        let now = Utc::now();
        let mut order = Order::place(sample_new_order(), now);
        order.next_status_update = Some(now);

        order.cancel(now, Some("customer request")).unwrap();

        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.next_status_update.is_none());
        assert_eq!(order.status_history.last().unwrap().note, "Order cancelled: customer request");
        order.check_invariants().unwrap();

        assert!(matches!(order.cancel(now, None), Err(OrderError::AlreadyCancelled(_))));
    }

    #[test]
    fn test_cannot_cancel_delivered_order() {
        let now = Utc::now();
        let mut order = Order::place(sample_new_order(), now);
        order.status = OrderStatus::Delivered;

        assert!(matches!(order.cancel(now, None), Err(OrderError::AlreadyDelivered(_))));
    }

    #[test]
    fn test_disabling_auto_progress_clears_schedule() {
        let now = Utc::now();
        let mut order = Order::place(sample_new_order(), now);
        order.next_status_update = Some(now);

        order.set_auto_progress(false, now);

        assert!(!order.is_active());
        assert!(order.next_status_update.is_none());
        order.check_invariants().unwrap();
    }

    #[test]
    fn test_invariants_reject_repeated_stage() {
        let now = Utc::now();
        let mut order = Order::place(sample_new_order(), now);
        order.status_history.push(StatusEntry::new(OrderStatus::Processing, now, "dup"));

        assert!(matches!(
            order.check_invariants(),
            Err(OrderError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_invariants_reject_missing_partner() {
        let now = Utc::now();
        let mut order = Order::place(sample_new_order(), now);
        order.record_status(OrderStatus::PartnerAssigned, now, "no partner".to_string());

        assert!(order.check_invariants().is_err());
    }

    #[test]
    fn test_invariants_reject_schedule_on_disabled_order() {
        let now = Utc::now();
        let mut order = Order::place(sample_new_order(), now);
        order.auto_progress_enabled = false;
        order.next_status_update = Some(now);

        assert!(order.check_invariants().is_err());
    }
}
