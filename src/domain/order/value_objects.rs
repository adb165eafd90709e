use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Fulfillment status of an order.
///
/// `Processing → PartnerAssigned → Shipped → Delivered` is the automatic
/// stage sequence; `Cancelled` is only ever reached out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Processing,
    #[serde(rename = "Delivery Partner Assigned")]
    PartnerAssigned,
    Shipped,
    Delivered,
    Cancelled,
}

/// The fixed stage list the scheduler walks through.
pub const STAGES: [OrderStatus; 4] = [
    OrderStatus::Processing,
    OrderStatus::PartnerAssigned,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
];

impl OrderStatus {
    /// Position in [`STAGES`], `None` for `Cancelled`.
    pub fn stage_index(self) -> Option<usize> {
        STAGES.iter().position(|s| *s == self)
    }

    /// The stage that follows this one, if any.
    pub fn next_stage(self) -> Option<OrderStatus> {
        self.stage_index().and_then(|i| STAGES.get(i + 1).copied())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Statuses that must carry a delivery partner.
    pub fn requires_partner(self) -> bool {
        matches!(
            self,
            OrderStatus::PartnerAssigned | OrderStatus::Shipped | OrderStatus::Delivered
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Processing => "Processing",
            OrderStatus::PartnerAssigned => "Delivery Partner Assigned",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" => Ok(OrderStatus::Processing),
            "Delivery Partner Assigned" => Ok(OrderStatus::PartnerAssigned),
            "Shipped" => Ok(OrderStatus::Shipped),
            "Delivered" => Ok(OrderStatus::Delivered),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// One entry in the append-only status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

impl StatusEntry {
    pub fn new(status: OrderStatus, timestamp: DateTime<Utc>, note: impl Into<String>) -> Self {
        Self {
            status,
            timestamp,
            note: note.into(),
        }
    }
}

/// Courier attached to an order when it reaches `PartnerAssigned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPartner {
    pub name: String,
    pub phone: String,
    pub vehicle_number: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    /// Unit price in minor currency units
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub landmark: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Razorpay,
    CashOnDelivery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub id: String,
    pub method: PaymentMethod,
    pub status: String,
}

impl PaymentInfo {
    /// Whether the payment collaborator has confirmed this order.
    ///
    /// Gateway payments count as confirmed once the order exists; other
    /// methods need an explicit `succeeded`/`paid` status.
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "paid")
            || self.method == PaymentMethod::Razorpay
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sequence() {
        assert_eq!(OrderStatus::Processing.next_stage(), Some(OrderStatus::PartnerAssigned));
        assert_eq!(OrderStatus::PartnerAssigned.next_stage(), Some(OrderStatus::Shipped));
        assert_eq!(OrderStatus::Shipped.next_stage(), Some(OrderStatus::Delivered));
        assert_eq!(OrderStatus::Delivered.next_stage(), None);
        assert_eq!(OrderStatus::Cancelled.next_stage(), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(!OrderStatus::Shipped.is_terminal());
    }

    #[test]
    fn test_status_labels_parse_back() {
        for status in STAGES.iter().copied().chain([OrderStatus::Cancelled]) {
            assert_eq!(status.label().parse::<OrderStatus>().unwrap(), status);
        }
        assert!(matches!(
            "Lost".parse::<OrderStatus>(),
            Err(OrderError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_partner_assigned_wire_label() {
        let json = serde_json::to_string(&OrderStatus::PartnerAssigned).unwrap();
        assert_eq!(json, "\"Delivery Partner Assigned\"");
    }

    #[test]
    fn test_payment_confirmation_rule() {
        let cod = PaymentInfo {
            id: "pay_1".to_string(),
            method: PaymentMethod::CashOnDelivery,
            status: "pending".to_string(),
        };
        assert!(!cod.is_confirmed());

        let paid_cod = PaymentInfo { status: "paid".to_string(), ..cod.clone() };
        assert!(paid_cod.is_confirmed());

        let gateway = PaymentInfo { method: PaymentMethod::Razorpay, ..cod };
        assert!(gateway.is_confirmed());
    }
}
