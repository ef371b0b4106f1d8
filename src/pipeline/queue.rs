use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// What a full queue does with a new item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room. Insertion always succeeds.
    DropOldest,
    /// Keep what is queued and discard the incoming item.
    DropNewest,
}

/// Result of a push. Overflow is a policy outcome, not an error.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum PushOutcome<T> {
    Enqueued,
    /// Inserted after evicting this item from the front.
    Evicted(T),
    /// Not inserted; the item is handed back.
    Rejected(T),
}

impl<T> PushOutcome<T> {
    pub fn is_drop(&self) -> bool {
        !matches!(self, PushOutcome::Enqueued)
    }
}

/// Fixed-capacity FIFO shared between two pipeline stages.
pub struct BoundedQueue<T> {
    capacity: usize,
    policy: OverflowPolicy,
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue. Panics if `capacity` is zero.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            policy,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total number of items discarded by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Push using the queue's configured policy.
    pub fn push(&self, item: T) -> PushOutcome<T> {
        self.push_with_policy(item, self.policy)
    }

    /// Push, applying `policy` if the queue is full. Never blocks on a full queue.
    pub fn push_with_policy(&self, item: T, policy: OverflowPolicy) -> PushOutcome<T> {
        let mut items = self.lock();

        let outcome = if items.len() < self.capacity {
            items.push_back(item);
            PushOutcome::Enqueued
        } else {
            match policy {
                OverflowPolicy::DropOldest => {
                    let evicted = items.pop_front();
                    items.push_back(item);
                    match evicted {
                        Some(old) => PushOutcome::Evicted(old),
                        None => PushOutcome::Enqueued,
                    }
                }
                OverflowPolicy::DropNewest => PushOutcome::Rejected(item),
            }
        };
        drop(items);

        match outcome {
            PushOutcome::Rejected(_) => {}
            _ => self.available.notify_one(),
        }
        if outcome.is_drop() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let items = self.lock();
        let (mut items, _) = self
            .available
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        items.pop_front()
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    // A panicking holder cannot leave the deque half-updated, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
