use uuid::Uuid;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order {0} has already been delivered")]
    AlreadyDelivered(Uuid),

    #[error("Order {0} is already cancelled")]
    AlreadyCancelled(Uuid),

    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Delivery partner roster cannot be empty")]
    EmptyRoster,

    #[error("Delay out of range: {0:?}")]
    DelayOutOfRange(std::time::Duration),

    #[error("Order {order_id} violates invariant: {reason}")]
    InvariantViolation { order_id: Uuid, reason: String },
}
