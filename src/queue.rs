//! C1 — Bounded Queue: fixed-capacity ordered sequence with an eviction
//! policy and a `dropped` observer channel.

use std::collections::VecDeque;

use crate::error::{codes, KernelError};

/// What happens to an incoming item when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict the oldest item to make room; the new item is always accepted.
    DropOldest,
    /// Reject the new item; existing contents are untouched.
    DropNewest,
    /// Reject the new item; semantically identical to `DropNewest` but
    /// named for call sites that want "back off" semantics explicitly
    /// (per §5, subsystem message queues should prefer this).
    Reject,
}

/// Why an item was dropped, passed to `dropped` observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    DropOldest,
    DropNewest,
    Reject,
}

/// A bounded, single-threaded cooperative queue. See `spec.md` §4.1.
pub struct BoundedQueue<T> {
    capacity: usize,
    policy: EvictionPolicy,
    items: VecDeque<T>,
    observers: Vec<Box<dyn Fn(&T, DropReason) + Send + Sync>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Result<Self, KernelError> {
        if capacity == 0 {
            return Err(KernelError::capacity(
                codes::QUEUE_INVALID_CAPACITY,
                "queue capacity must be greater than zero",
            ));
        }
        Ok(Self { capacity, policy, items: VecDeque::with_capacity(capacity), observers: Vec::new() })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn utilization(&self) -> f64 {
        self.items.len() as f64 / self.capacity as f64
    }

    pub fn on_dropped(&mut self, observer: impl Fn(&T, DropReason) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify_dropped(&self, item: &T, reason: DropReason) {
        for observer in &self.observers {
            observer(item, reason);
        }
    }

    /// Returns `true` if the item was accepted.
    pub fn enqueue(&mut self, item: T) -> bool {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return true;
        }
        match self.policy {
            EvictionPolicy::DropOldest => {
                if let Some(evicted) = self.items.pop_front() {
                    self.notify_dropped(&evicted, DropReason::DropOldest);
                }
                self.items.push_back(item);
                true
            }
            EvictionPolicy::DropNewest => {
                self.notify_dropped(&item, DropReason::DropNewest);
                false
            }
            EvictionPolicy::Reject => {
                self.notify_dropped(&item, DropReason::Reject);
                false
            }
        }
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek_all(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: PartialEq> BoundedQueue<T> {
    /// Remove the first item equal to `item`. Used by the scheduler to
    /// remove the exact pair it selected from a snapshot.
    pub fn remove(&mut self, item: &T) -> bool {
        if let Some(pos) = self.items.iter().position(|x| x == item) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn rejects_zero_capacity() {
        assert!(BoundedQueue::<i32>::new(0, EvictionPolicy::Reject).is_err());
    }

    #[test]
    fn drop_oldest_keeps_most_recent_and_counts_drops() {
        let mut q = BoundedQueue::new(2, EvictionPolicy::DropOldest).unwrap();
        let dropped: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let dropped_clone = dropped.clone();
        q.on_dropped(move |item, reason| {
            assert_eq!(reason, DropReason::DropOldest);
            dropped_clone.borrow_mut().push(*item);
        });
        assert!(q.enqueue(1));
        assert!(q.enqueue(2));
        assert!(q.enqueue(3));
        assert_eq!(q.peek_all().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(*dropped.borrow(), vec![1]);
    }

    #[test]
    fn drop_oldest_invariant_holds_for_n_greater_than_capacity() {
        let mut q = BoundedQueue::new(3, EvictionPolicy::DropOldest).unwrap();
        let drop_count = Rc::new(RefCell::new(0usize));
        let drop_count_clone = drop_count.clone();
        q.on_dropped(move |_, _| *drop_count_clone.borrow_mut() += 1);
        let n = 10;
        for i in 0..n {
            q.enqueue(i);
        }
        let remaining: Vec<_> = q.peek_all().copied().collect();
        assert_eq!(remaining, vec![7, 8, 9]);
        assert_eq!(*drop_count.borrow(), n as usize - 3);
    }

    #[test]
    fn reject_policy_rejects_without_mutating() {
        let mut q = BoundedQueue::new(1, EvictionPolicy::Reject).unwrap();
        assert!(q.enqueue(1));
        assert!(!q.enqueue(2));
        assert_eq!(q.peek_all().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn drop_newest_rejects_incoming() {
        let mut q = BoundedQueue::new(1, EvictionPolicy::DropNewest).unwrap();
        assert!(q.enqueue(1));
        assert!(!q.enqueue(2));
        assert_eq!(q.peek_all().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn remove_deletes_first_match_only() {
        let mut q = BoundedQueue::new(4, EvictionPolicy::Reject).unwrap();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(1);
        assert!(q.remove(&1));
        assert_eq!(q.peek_all().copied().collect::<Vec<_>>(), vec![2, 1]);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn pt_drop_oldest_never_exceeds_capacity_and_keeps_the_tail(
            capacity in 1usize..16, pushes in 0usize..64,
        ) {
            let mut q = BoundedQueue::new(capacity, EvictionPolicy::DropOldest).unwrap();
            for i in 0..pushes {
                q.enqueue(i);
            }
            let remaining: Vec<_> = q.peek_all().copied().collect();
            prop_assert!(remaining.len() <= capacity);
            let expected_first = pushes.saturating_sub(capacity);
            let expected: Vec<_> = (expected_first..pushes).collect();
            prop_assert_eq!(remaining, expected);
        }

        #[test]
        fn pt_reject_never_grows_past_capacity(capacity in 1usize..16, pushes in 0usize..64) {
            let mut q = BoundedQueue::new(capacity, EvictionPolicy::Reject).unwrap();
            for i in 0..pushes {
                q.enqueue(i);
            }
            prop_assert!(q.size() <= capacity);
            prop_assert!(q.size() == pushes.min(capacity));
        }
    }
}
