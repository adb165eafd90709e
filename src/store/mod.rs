// ============================================================================
// Order Record Store
// ============================================================================
//
// Durable storage for order records. Saves are compare-and-set on the
// record's `version`: a writer that loaded a stale copy gets `Conflict`
// instead of silently overwriting a newer stage.
//
// ============================================================================

mod memory;
mod scylla_store;

pub use memory::InMemoryOrderStore;
pub use scylla_store::ScyllaOrderStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::order::Order;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Order {0} not found")]
    NotFound(Uuid),

    #[error("Order {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Concurrency conflict on order {order_id}: expected version {expected}, but current is {actual}")]
    Conflict {
        order_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    #[error("Order store backend error: {0}")]
    Backend(String),

    #[error("Order record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rejected malformed order: {0}")]
    Invalid(#[from] crate::domain::order::OrderError),
}

impl StoreError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::AlreadyExists(_) => "already_exists",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Backend(_) => "backend",
            StoreError::Serialization(_) => "serialization",
            StoreError::Invalid(_) => "invalid",
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a newly created order. Fails if the id is taken or the record is malformed.
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    async fn load(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Write `order` if the stored version still equals `order.version`.
    /// Returns the new version.
    async fn save(&self, order: &Order) -> Result<i64, StoreError>;

    /// Active orders whose `next_status_update` is at or before `now`.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    /// All non-terminal orders with auto-progress enabled.
    async fn find_active(&self) -> Result<Vec<Order>, StoreError>;
}
