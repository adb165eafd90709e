use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::order::Order;
use super::{OrderStore, StoreError};

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// Process-local store used by tests and the demo binary. Supports fault
// injection so recovery paths can be exercised without a real database.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    failing_saves: AtomicUsize,
    racing_saves: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` saves fail with `Unavailable`.
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` saves lose a race: another writer bumps the
    /// stored version first without touching anything else.
    pub fn race_next_saves(&self, count: usize) {
        self.racing_saves.store(count, Ordering::SeqCst);
    }

    /// Make every operation fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Overwrite a record without any version check, as an out-of-band
    /// collaborator (admin tooling, another service) would.
    pub async fn put(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }
}

fn take_injected(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.check_available()?;
        order.check_invariants()?;

        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::AlreadyExists(order.id));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn load(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        self.check_available()?;
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn save(&self, order: &Order) -> Result<i64, StoreError> {
        self.check_available()?;
        if take_injected(&self.failing_saves) {
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }

        let mut orders = self.orders.write().await;
        let current = orders.get_mut(&order.id).ok_or(StoreError::NotFound(order.id))?;
        if take_injected(&self.racing_saves) {
            current.version += 1;
        }
        if current.version != order.version {
            return Err(StoreError::Conflict {
                order_id: order.id,
                expected: order.version,
                actual: current.version,
            });
        }

        let new_version = order.version + 1;
        let mut stored = order.clone();
        stored.version = new_version;
        orders.insert(order.id, stored);
        Ok(new_version)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        self.check_available()?;
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.is_active() && o.next_status_update.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    async fn find_active(&self) -> Result<Vec<Order>, StoreError> {
        self.check_available()?;
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::aggregate::tests::sample_new_order;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryOrderStore::new();
        let order = Order::place(sample_new_order(), Utc::now());

        store.insert(&order).await.unwrap();
        assert_eq!(store.load(order.id).await.unwrap(), Some(order.clone()));
        assert!(matches!(store.insert(&order).await, Err(StoreError::AlreadyExists(_))));
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_malformed_order() {
        let store = InMemoryOrderStore::new();
        let mut order = Order::place(sample_new_order(), Utc::now());
        order.status_history.clear();

        assert!(matches!(store.insert(&order).await, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_save_detects_stale_version() {
        let store = InMemoryOrderStore::new();
        let order = Order::place(sample_new_order(), Utc::now());
        store.insert(&order).await.unwrap();

        let mut first = order.clone();
        first.auto_progress_enabled = false;
        assert_eq!(store.save(&first).await.unwrap(), 1);

        // Second writer still holds version 0
        let result = store.save(&order).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict { expected: 0, actual: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_raced_save_conflicts_once() {
        let store = InMemoryOrderStore::new();
        let order = Order::place(sample_new_order(), Utc::now());
        store.insert(&order).await.unwrap();

        store.race_next_saves(1);
        assert!(matches!(
            store.save(&order).await,
            Err(StoreError::Conflict { expected: 0, actual: 1, .. })
        ));

        let reloaded = store.load(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status_history, order.status_history);
        assert_eq!(store.save(&reloaded).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_due_filters_inactive_and_future() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();

        let mut due = Order::place(sample_new_order(), now);
        due.next_status_update = Some(now - TimeDelta::seconds(1));
        let mut future = Order::place(sample_new_order(), now);
        future.next_status_update = Some(now + TimeDelta::seconds(60));
        let mut disabled = Order::place(sample_new_order(), now);
        disabled.auto_progress_enabled = false;
        let unscheduled = Order::place(sample_new_order(), now);

        for order in [&due, &future, &unscheduled] {
            store.insert(order).await.unwrap();
        }
        // Bypass invariant checks: a stale row left behind by another writer
        disabled.next_status_update = Some(now - TimeDelta::seconds(1));
        store.put(disabled).await;

        let found = store.find_due(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);

        assert_eq!(store.find_active().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = InMemoryOrderStore::new();
        let order = Order::place(sample_new_order(), Utc::now());
        store.insert(&order).await.unwrap();

        store.fail_next_saves(1);
        assert!(matches!(store.save(&order).await, Err(StoreError::Unavailable(_))));
        assert_eq!(store.save(&order).await.unwrap(), 1);

        store.set_unavailable(true);
        assert!(store.load(order.id).await.is_err());
        store.set_unavailable(false);
        assert!(store.load(order.id).await.unwrap().is_some());
    }
}
