use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

// ============================================================================
// Timer Registry
// ============================================================================
//
// order id -> the single armed wake-up task for that order.
//
// Arming happens under the registry lock, so a freshly spawned task that
// fires immediately still observes its own entry. A firing task claims its
// entry with `release`; a task whose generation no longer matches was
// replaced and must not act.
//
// The lock is never held across an await.
//
// ============================================================================

struct ArmedTimer {
    generation: u64,
    due_at: DateTime<Utc>,
    handle: AbortHandle,
}

#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<Uuid, ArmedTimer>>,
    next_generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ArmedTimer>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Spawn a timer task via `spawn(generation)` and register it, aborting
    /// whatever was armed for the order before. Returns true if one was replaced.
    pub fn arm<F>(&self, order_id: Uuid, due_at: DateTime<Utc>, spawn: F) -> bool
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let generation = self.bump_generation();
        let mut timers = self.lock();
        let handle = spawn(generation).abort_handle();

        let previous = timers.insert(
            order_id,
            ArmedTimer {
                generation,
                due_at,
                handle,
            },
        );

        match previous {
            Some(old) => {
                old.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a firing task. Removes the entry and returns true only if
    /// it still belongs to `generation`.
    pub fn release(&self, order_id: Uuid, generation: u64) -> bool {
        let mut timers = self.lock();
        match timers.get(&order_id) {
            Some(armed) if armed.generation == generation => {
                timers.remove(&order_id);
                true
            }
            _ => false,
        }
    }

    /// Abort and forget the pending timer for an order.
    pub fn cancel(&self, order_id: Uuid) -> bool {
        match self.lock().remove(&order_id) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<ArmedTimer> = self.lock().drain().map(|(_, armed)| armed).collect();
        for armed in &drained {
            armed.handle.abort();
        }
        drained.len()
    }

    pub fn due_at(&self, order_id: Uuid) -> Option<DateTime<Utc>> {
        self.lock().get(&order_id).map(|armed| armed.due_at)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
