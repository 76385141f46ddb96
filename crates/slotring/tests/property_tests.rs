//! Property-based tests for the slotted ring buffer invariants.
//!
//! Coverage:
//! - Bounded count: the reserved span never exceeds capacity.
//! - FIFO: values come out in push order for a single producer.
//! - Conservation: nothing is lost or duplicated across arbitrary
//!   interleavings of pushes and pops.

use proptest::prelude::*;
use slotring::{ForcedPush, Pop, SlotRing};

proptest! {
    /// The reserved span stays within capacity after any push/pop sequence.
    #[test]
    fn prop_bounded_count(
        capacity in 2usize..64,
        ops in prop::collection::vec(any::<bool>(), 0..400),
    ) {
        let ring = SlotRing::<u64>::with_capacity(capacity);
        let cap = ring.capacity();
        let mut next = 0u64;

        for push in ops {
            if push {
                let _ = ring.try_push(next);
                next += 1;
            } else {
                let _ = ring.try_pop();
            }
            prop_assert!(ring.len() <= cap,
                "reserved span {} exceeds capacity {}", ring.len(), cap);
        }
    }

    /// Single-producer FIFO: pops observe pushes in order, with no gaps.
    #[test]
    fn prop_fifo_single_producer(
        capacity in 2usize..32,
        ops in prop::collection::vec(any::<bool>(), 0..400),
    ) {
        let ring = SlotRing::<u64>::with_capacity(capacity);
        let mut pushed = 0u64;
        let mut popped = 0u64;

        for push in ops {
            if push {
                if ring.try_push(pushed).is_ok() {
                    pushed += 1;
                }
            } else {
                match ring.try_pop() {
                    Pop::Popped(v) => {
                        prop_assert_eq!(v, popped);
                        popped += 1;
                    }
                    Pop::Empty => prop_assert_eq!(popped, pushed),
                    Pop::Pending => prop_assert!(false, "single-threaded pop saw a gap"),
                }
            }
        }

        // Drain the remainder; everything pushed must come out exactly once.
        while let Pop::Popped(v) = ring.try_pop() {
            prop_assert_eq!(v, popped);
            popped += 1;
        }
        prop_assert_eq!(popped, pushed);
    }

    /// Forced pushes never grow the ring past capacity and conserve values:
    /// each push either queues or returns exactly one displaced value.
    #[test]
    fn prop_forced_push_conserves(
        capacity in 2usize..16,
        extra in 1usize..32,
    ) {
        let ring = SlotRing::<u64>::with_capacity(capacity);
        let cap = ring.capacity();
        let mut displaced = 0usize;
        let total = cap + extra;

        for i in 0..total as u64 {
            match ring.push_forced(i) {
                ForcedPush::Queued => {}
                ForcedPush::Replaced(_) => displaced += 1,
            }
            prop_assert!(ring.len() <= cap);
        }

        let mut drained = 0usize;
        while let Pop::Popped(_) = ring.try_pop() {
            drained += 1;
        }
        prop_assert_eq!(drained + displaced, total);
    }
}
