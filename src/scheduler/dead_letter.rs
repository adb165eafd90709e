use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Dead Letter Tracking
// ============================================================================
//
// Counts consecutive persistence failures per order. Once an order reaches
// the threshold it is parked: the sweep stops retrying it until an operator
// recovers it or a manual step succeeds.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub order_id: Uuid,
    pub failure_count: u32,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

pub struct DeadLetterQueue {
    threshold: u32,
    failures: Mutex<HashMap<Uuid, DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, DeadLetter>> {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count a failure. Returns true when this failure crosses the threshold.
    pub fn record_failure(&self, order_id: Uuid, error: &str, now: DateTime<Utc>) -> bool {
        let mut failures = self.lock();
        let entry = failures.entry(order_id).or_insert_with(|| DeadLetter {
            order_id,
            failure_count: 0,
            last_error: String::new(),
            first_failed_at: now,
            last_failed_at: now,
        });
        entry.failure_count += 1;
        entry.last_error = error.to_string();
        entry.last_failed_at = now;
        entry.failure_count == self.threshold
    }

    /// Forget the failure streak after a successful step.
    pub fn clear(&self, order_id: Uuid) -> bool {
        self.lock().remove(&order_id).is_some()
    }

    pub fn is_dead_lettered(&self, order_id: Uuid) -> bool {
        self.lock()
            .get(&order_id)
            .is_some_and(|entry| entry.failure_count >= self.threshold)
    }

    /// Parked orders, oldest failure streak first.
    pub fn list(&self) -> Vec<DeadLetter> {
        let mut parked: Vec<DeadLetter> = self
            .lock()
            .values()
            .filter(|entry| entry.failure_count >= self.threshold)
            .cloned()
            .collect();
        parked.sort_by_key(|entry| entry.first_failed_at);
        parked
    }

    pub fn dead_lettered_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| entry.failure_count >= self.threshold)
            .count()
    }

    /// Release every parked order back to the sweep. Returns their ids.
    pub fn recover_all(&self) -> Vec<Uuid> {
        let mut failures = self.lock();
        let recovered: Vec<Uuid> = failures
            .values()
            .filter(|entry| entry.failure_count >= self.threshold)
            .map(|entry| entry.order_id)
            .collect();
        for order_id in &recovered {
            failures.remove(order_id);
        }
        recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_dead_letters_at_threshold() {
        let queue = DeadLetterQueue::new(3);
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        assert!(!queue.record_failure(order_id, "timeout", now));
        assert!(!queue.record_failure(order_id, "timeout", now));
        assert!(!queue.is_dead_lettered(order_id));
        assert!(queue.record_failure(order_id, "unavailable", now + TimeDelta::seconds(1)));
        assert!(queue.is_dead_lettered(order_id));

        // Further failures don't re-announce
        assert!(!queue.record_failure(order_id, "unavailable", now));

        let parked = queue.list();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].failure_count, 4);
        assert_eq!(parked[0].last_error, "unavailable");
        assert_eq!(parked[0].first_failed_at, now);
    }

    #[test]
    fn test_success_clears_streak() {
        let queue = DeadLetterQueue::new(2);
        let order_id = Uuid::new_v4();

        queue.record_failure(order_id, "timeout", Utc::now());
        assert!(queue.clear(order_id));
        assert!(!queue.record_failure(order_id, "timeout", Utc::now()));
        assert!(!queue.is_dead_lettered(order_id));
    }

    #[test]
    fn test_recover_all_only_releases_parked_orders() {
        let queue = DeadLetterQueue::new(1);
        let parked = Uuid::new_v4();
        queue.record_failure(parked, "boom", Utc::now());

        let streaking = DeadLetterQueue::new(5);
        streaking.record_failure(parked, "boom", Utc::now());
        assert!(streaking.recover_all().is_empty());

        assert_eq!(queue.recover_all(), vec![parked]);
        assert_eq!(queue.dead_lettered_count(), 0);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let queue = DeadLetterQueue::new(0);
        assert_eq!(queue.threshold(), 1);
    }
}
