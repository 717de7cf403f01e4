//! Integration coverage for the bounded queue's eviction discipline
//! (`spec.md` §4.1, §8 property 6, concrete scenario 5).

use std::cell::RefCell;
use std::rc::Rc;

use mycelia_kernel::{BoundedQueue, DropReason, EvictionPolicy};

#[test]
fn drop_oldest_retains_most_recent_c_items_in_insertion_order() {
    let mut q = BoundedQueue::new(2, EvictionPolicy::DropOldest).unwrap();
    let dropped: Rc<RefCell<Vec<(char, DropReason)>>> = Rc::new(RefCell::new(Vec::new()));
    let dropped_clone = dropped.clone();
    q.on_dropped(move |item, reason| dropped_clone.borrow_mut().push((*item, reason)));

    assert!(q.enqueue('a'));
    assert!(q.enqueue('b'));
    assert!(q.enqueue('c'));

    assert_eq!(q.peek_all().copied().collect::<Vec<_>>(), vec!['b', 'c']);
    assert_eq!(dropped.borrow().as_slice(), &[('a', DropReason::DropOldest)]);
}

#[test]
fn invariant_holds_across_many_enqueues_past_capacity() {
    let mut q = BoundedQueue::new(4, EvictionPolicy::DropOldest).unwrap();
    let drops = Rc::new(RefCell::new(0usize));
    let drops_clone = drops.clone();
    q.on_dropped(move |_, _| *drops_clone.borrow_mut() += 1);

    let n = 37;
    for i in 0..n {
        q.enqueue(i);
    }
    let remaining: Vec<_> = q.peek_all().copied().collect();
    assert_eq!(remaining, (n - 4..n).collect::<Vec<_>>());
    assert_eq!(*drops.borrow(), n as usize - 4);
}

#[test]
fn zero_capacity_is_rejected_before_any_enqueue() {
    let err = BoundedQueue::<()>::new(0, EvictionPolicy::Reject).unwrap_err();
    assert_eq!(err.code(), mycelia_kernel::codes::QUEUE_INVALID_CAPACITY);
}

#[test]
fn reject_policy_leaves_existing_contents_untouched_on_overflow() {
    let mut q = BoundedQueue::new(2, EvictionPolicy::Reject).unwrap();
    assert!(q.enqueue(1));
    assert!(q.enqueue(2));
    assert!(!q.enqueue(3));
    assert_eq!(q.peek_all().copied().collect::<Vec<_>>(), vec![1, 2]);
}
