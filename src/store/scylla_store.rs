use std::fmt::Display;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::response::query_result::QueryResult;
use scylla::value::{CqlValue, Row};
use uuid::Uuid;

use crate::domain::order::{Order, OrderStatus};
use super::{OrderStore, StoreError};

// ============================================================================
// ScyllaDB Order Store
// ============================================================================
//
// One row per order. Nested structures (history, partner, items, shipping,
// payment) are JSON text columns; the scheduling fields are native columns so
// the reconciliation scan can filter on them.
//
// Concurrency: inserts use `IF NOT EXISTS`, saves use `IF version = ?`
// (lightweight transactions), so a stale writer is rejected instead of
// regressing an order.
//
// Scans use ALLOW FILTERING. Fine for the order volumes this service sees;
// a larger deployment would add a due-bucket table keyed by time.
//
// ============================================================================

const ORDER_COLUMNS: &str = "id, version, tracking_id, status, status_history, \
    auto_progress_enabled, next_status_update, delivery_partner, delivered_at, \
    items, shipping_info, payment_info, total_cents, created_at, updated_at";

type OrderRow = (
    Uuid,
    i64,
    String,
    String,
    String,
    bool,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<DateTime<Utc>>,
    String,
    String,
    String,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub struct ScyllaOrderStore {
    session: Arc<Session>,
}

impl ScyllaOrderStore {
    /// Connect, create the keyspace/table if needed, and switch to the keyspace.
    pub async fn connect(uri: &str, keyspace: &str) -> Result<Self, StoreError> {
        if keyspace.is_empty() || !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::Backend(format!("invalid keyspace name: {}", keyspace)));
        }

        tracing::info!(uri = %uri, keyspace = %keyspace, "Connecting to ScyllaDB...");
        let session: Session = SessionBuilder::new()
            .known_node(uri)
            .build()
            .await
            .map_err(unavailable)?;

        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    keyspace
                ),
                &[],
            )
            .await
            .map_err(unavailable)?;

        session.use_keyspace(keyspace, false).await.map_err(unavailable)?;

        let store = Self::from_session(Arc::new(session));
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_session(session: Arc<Session>) -> Self {
        Self { session }
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.session
            .query_unpaged(
                "CREATE TABLE IF NOT EXISTS orders (
                    id uuid PRIMARY KEY,
                    version bigint,
                    tracking_id text,
                    status text,
                    status_history text,
                    auto_progress_enabled boolean,
                    next_status_update timestamp,
                    delivery_partner text,
                    delivered_at timestamp,
                    items text,
                    shipping_info text,
                    payment_info text,
                    total_cents bigint,
                    created_at timestamp,
                    updated_at timestamp
                )",
                &[],
            )
            .await
            .map_err(unavailable)?;

        tracing::info!("✅ Orders table ready");
        Ok(())
    }

    async fn select_where(&self, clause: &str, now: Option<DateTime<Utc>>) -> Result<Vec<Order>, StoreError> {
        let query = format!("SELECT {} FROM orders WHERE {} ALLOW FILTERING", ORDER_COLUMNS, clause);
        let result = match now {
            Some(now) => self.session.query_unpaged(query, (now,)).await,
            None => self.session.query_unpaged(query, &[]).await,
        }
        .map_err(unavailable)?;

        let rows_result = result.into_rows_result().map_err(backend)?;
        let mut orders = Vec::new();
        for row in rows_result.rows::<OrderRow>().map_err(backend)? {
            let order = order_from_row(row.map_err(backend)?)?;
            // Status is stored as text; filter terminal orders here rather than in CQL
            if order.is_active() {
                orders.push(order);
            }
        }
        Ok(orders)
    }
}

#[async_trait]
impl OrderStore for ScyllaOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        order.check_invariants()?;
        let row = row_from_order(order)?;

        let result = self
            .session
            .query_unpaged(
                format!(
                    "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS",
                    ORDER_COLUMNS
                ),
                row,
            )
            .await
            .map_err(unavailable)?;

        let (applied, _) = lwt_outcome(result)?;
        if !applied {
            return Err(StoreError::AlreadyExists(order.id));
        }

        tracing::debug!(order_id = %order.id, "Inserted order");
        Ok(())
    }

    async fn load(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS),
                (order_id,),
            )
            .await
            .map_err(unavailable)?;

        let rows_result = result.into_rows_result().map_err(backend)?;
        match rows_result.maybe_first_row::<OrderRow>().map_err(backend)? {
            Some(row) => Ok(Some(order_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, order: &Order) -> Result<i64, StoreError> {
        let new_version = order.version + 1;
        let (
            id,
            _,
            tracking_id,
            status,
            status_history,
            auto_progress_enabled,
            next_status_update,
            delivery_partner,
            delivered_at,
            items,
            shipping_info,
            payment_info,
            total_cents,
            _,
            updated_at,
        ) = row_from_order(order)?;

        let result = self
            .session
            .query_unpaged(
                "UPDATE orders SET version = ?, tracking_id = ?, status = ?, status_history = ?, \
                 auto_progress_enabled = ?, next_status_update = ?, delivery_partner = ?, \
                 delivered_at = ?, items = ?, shipping_info = ?, payment_info = ?, \
                 total_cents = ?, updated_at = ? WHERE id = ? IF version = ?",
                (
                    new_version,
                    tracking_id,
                    status,
                    status_history,
                    auto_progress_enabled,
                    next_status_update,
                    delivery_partner,
                    delivered_at,
                    items,
                    shipping_info,
                    payment_info,
                    total_cents,
                    updated_at,
                    id,
                    order.version,
                ),
            )
            .await
            .map_err(unavailable)?;

        match lwt_outcome(result)? {
            (true, _) => Ok(new_version),
            (false, Some(actual)) => Err(StoreError::Conflict {
                order_id: order.id,
                expected: order.version,
                actual,
            }),
            (false, None) => Err(StoreError::NotFound(order.id)),
        }
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        self.select_where("auto_progress_enabled = true AND next_status_update <= ?", Some(now))
            .await
    }

    async fn find_active(&self) -> Result<Vec<Order>, StoreError> {
        self.select_where("auto_progress_enabled = true", None).await
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn row_from_order(order: &Order) -> Result<OrderRow, StoreError> {
    let delivery_partner = order
        .delivery_partner
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok((
        order.id,
        order.version,
        order.tracking_id.clone(),
        order.status.label().to_string(),
        serde_json::to_string(&order.status_history)?,
        order.auto_progress_enabled,
        order.next_status_update,
        delivery_partner,
        order.delivered_at,
        serde_json::to_string(&order.items)?,
        serde_json::to_string(&order.shipping_info)?,
        serde_json::to_string(&order.payment_info)?,
        order.total_cents,
        order.created_at,
        order.updated_at,
    ))
}

fn order_from_row(row: OrderRow) -> Result<Order, StoreError> {
    let (
        id,
        version,
        tracking_id,
        status,
        status_history,
        auto_progress_enabled,
        next_status_update,
        delivery_partner,
        delivered_at,
        items,
        shipping_info,
        payment_info,
        total_cents,
        created_at,
        updated_at,
    ) = row;

    Ok(Order {
        id,
        version,
        tracking_id,
        status: status.parse::<OrderStatus>()?,
        status_history: serde_json::from_str(&status_history)?,
        auto_progress_enabled,
        next_status_update,
        delivery_partner: delivery_partner
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        delivered_at,
        items: serde_json::from_str(&items)?,
        shipping_info: serde_json::from_str(&shipping_info)?,
        payment_info: serde_json::from_str(&payment_info)?,
        total_cents,
        created_at,
        updated_at,
    })
}

/// `[applied]` flag of a lightweight transaction, plus the current `version`
/// column when the condition failed on an existing row.
fn lwt_outcome(result: QueryResult) -> Result<(bool, Option<i64>), StoreError> {
    let rows_result = result.into_rows_result().map_err(backend)?;
    let row = rows_result
        .maybe_first_row::<Row>()
        .map_err(backend)?
        .ok_or_else(|| StoreError::Backend("empty lightweight transaction response".to_string()))?;

    let applied = row
        .columns
        .first()
        .and_then(|c| c.as_ref())
        .and_then(CqlValue::as_boolean)
        .unwrap_or(false);
    let current_version = row
        .columns
        .get(1)
        .and_then(|c| c.as_ref())
        .and_then(CqlValue::as_bigint);

    Ok((applied, current_version))
}

fn unavailable<E: Display>(e: E) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn backend<E: Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::aggregate::tests::sample_new_order;
    use crate::domain::order::DeliveryPartner;

    #[test]
    fn test_row_mapping_preserves_record() {
        let now = Utc::now();
        let mut order = Order::place(sample_new_order(), now);
        order.version = 3;
        order.delivery_partner = Some(DeliveryPartner {
            name: "Amit Singh".to_string(),
            phone: "+91 76543 21098".to_string(),
            vehicle_number: "KA 03 EF 9012".to_string(),
            assigned_at: now,
        });
        order.status = OrderStatus::PartnerAssigned;

        let row = row_from_order(&order).unwrap();
        assert_eq!(row.3, "Delivery Partner Assigned");
        assert_eq!(order_from_row(row).unwrap(), order);
    }

    #[test]
    fn test_unknown_status_text_is_rejected() {
        let order = Order::place(sample_new_order(), Utc::now());
        let mut row = row_from_order(&order).unwrap();
        row.3 = "Teleported".to_string();

        assert!(matches!(order_from_row(row), Err(StoreError::Invalid(_))));
    }
}
