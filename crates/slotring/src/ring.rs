use crate::invariants::{debug_assert_bounded_len, debug_assert_head_order};
use crate::Backoff;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The ring couples two protocols: monotonic u64 positions for space
// accounting, and a per-entry state machine for publication.
//
// ## Positions
//
// `write_pos` and `read_pos` are unbounded u64 sequence numbers. The entry
// index is `pos & mask`. The ring is full when `write_pos - read_pos >=
// capacity` (unsigned arithmetic; overflow of 2^64 entries is treated as
// impossible).
//
// ## Entry states
//
// Each entry owns an atomic state byte with four values:
//
//   Vacant --(producer CAS)--> Writing --(store)--> Ready
//   Ready --(consumer CAS)--> Reading --(store)--> Vacant
//
// A position is owned by exactly one producer (positions are handed out by
// CAS or fetch-add on `write_pos`), so the Vacant -> Writing transition can
// only race with a consumer that has not yet released the slot from a
// previous lap. The consumer stores Vacant *before* advancing `read_pos`
// with Release, so a producer that observed enough space via an Acquire load
// of `read_pos` also observes the Vacant state of its slot.
//
// ## Publication
//
// The value is written between Writing and the Release store of Ready. The
// consumer's Acquire CAS of Ready -> Reading synchronizes with that store,
// so the value read afterwards is fully initialized.
//
// ## Gaps
//
// Because the Ready publication is not atomic with the position reservation,
// a slow producer leaves a gap: `read_pos < write_pos` but the entry at
// `read_pos` is not Ready yet. The consumer reports this as [`Pop::Pending`]
// and MUST NOT advance past it; only the shutdown drain may give up on a
// persistent gap, and it abandons the remainder instead of skipping.
//
// =============================================================================

const VACANT: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;
const READING: u8 = 3;

/// Result of a single consume attempt.
#[derive(Debug)]
pub enum Pop<T> {
    /// An entry was consumed.
    Popped(T),
    /// No reserved entries remain.
    Empty,
    /// The entry at the read position is reserved but not yet published
    /// (a producer is still writing it). Retry later; do not skip.
    Pending,
}

/// Result of a forced push (poison path).
#[derive(Debug)]
pub enum ForcedPush<T> {
    /// The value was queued into a free slot.
    Queued,
    /// The ring was persistently full; the newest ready entry was replaced
    /// in place and its previous value is returned to the caller (usually to
    /// be counted as dropped).
    Replaced(T),
}

struct Entry<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity slotted ring buffer.
///
/// Multiple producers may push concurrently; exactly one consumer may pop.
/// Entries are cache-padded so that adjacent producers writing neighboring
/// slots never share a cache line, and each position counter lives in its
/// own cache line as well.
pub struct SlotRing<T> {
    // === PRODUCER HOT ===
    write_pos: CachePadded<AtomicU64>,
    // === CONSUMER HOT ===
    read_pos: CachePadded<AtomicU64>,
    // === DATA ===
    entries: Box<[CachePadded<Entry<T>>]>,
    mask: u64,
}

// Safety: values are moved in by producers and out by the single consumer;
// all cross-thread hand-off is mediated by the entry state protocol above.
unsafe impl<T: Send> Send for SlotRing<T> {}
unsafe impl<T: Send> Sync for SlotRing<T> {}

impl<T> SlotRing<T> {
    /// Creates a ring with at least `capacity` entries.
    ///
    /// The capacity is rounded up to a power of two so the position-to-index
    /// mapping is a mask instead of a division. The minimum capacity is 2.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let entries = (0..capacity)
            .map(|_| {
                CachePadded::new(Entry {
                    state: AtomicU8::new(VACANT),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            write_pos: CachePadded::new(AtomicU64::new(0)),
            read_pos: CachePadded::new(AtomicU64::new(0)),
            entries,
            mask: capacity as u64 - 1,
        }
    }

    /// Returns the ring capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of reserved-but-unconsumed positions.
    ///
    /// This counts reservations, including entries a producer has not yet
    /// published, and can momentarily exceed the capacity while WAIT-policy
    /// producers hold reservations beyond the current lap.
    #[inline]
    pub fn len(&self) -> usize {
        let wp = self.write_pos.load(Ordering::Relaxed);
        let rp = self.read_pos.load(Ordering::Relaxed);
        wp.wrapping_sub(rp) as usize
    }

    /// Returns true if no positions are reserved.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write_pos.load(Ordering::Relaxed) == self.read_pos.load(Ordering::Relaxed)
    }

    #[inline]
    fn entry(&self, pos: u64) -> &Entry<T> {
        &self.entries[(pos & self.mask) as usize]
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Attempts to push without waiting.
    ///
    /// On success returns whether the ring was observed empty at reservation
    /// time (producers use this to raise the "non-empty ring" hint bit). On
    /// a full ring the value is handed back unchanged.
    pub fn try_push(&self, value: T) -> Result<bool, T> {
        let mut wp = self.write_pos.load(Ordering::Relaxed);
        loop {
            let rp = self.read_pos.load(Ordering::Acquire);
            if wp.wrapping_sub(rp) >= self.capacity() as u64 {
                return Err(value);
            }
            match self.write_pos.compare_exchange_weak(
                wp,
                wp.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    debug_assert_bounded_len!(
                        wp.wrapping_add(1).wrapping_sub(rp),
                        self.capacity() as u64
                    );
                    self.publish(wp, value);
                    return Ok(wp == rp);
                }
                Err(current) => wp = current,
            }
        }
    }

    /// Pushes under the WAIT congestion policy.
    ///
    /// Reserves a position unconditionally with fetch-add, then backoff-spins
    /// until the position comes within capacity of the read position. This
    /// deliberately couples producer latency to consumer throughput; callers
    /// wanting bounded latency should use [`SlotRing::try_push`] and a
    /// discard policy instead.
    ///
    /// Returns whether the ring was observed empty at publish time.
    pub fn push_wait(&self, value: T) -> bool {
        let pos = self.write_pos.fetch_add(1, Ordering::AcqRel);
        let mut backoff = Backoff::new();
        loop {
            let rp = self.read_pos.load(Ordering::Acquire);
            if pos.wrapping_sub(rp) < self.capacity() as u64 {
                self.publish(pos, value);
                return pos == rp;
            }
            backoff.snooze();
            if backoff.is_completed() {
                backoff.reset();
            }
        }
    }

    /// Pushes a value that must not be lost (the poison sentinel).
    ///
    /// Tries normal admission with bounded backoff first. If the ring stays
    /// full, the newest Ready entry is replaced in place and its old value is
    /// returned so the caller can account for the displaced record.
    pub fn push_forced(&self, value: T) -> ForcedPush<T> {
        let mut value = value;
        let mut backoff = Backoff::new();
        loop {
            match self.try_push(value) {
                Ok(_) => return ForcedPush::Queued,
                Err(v) => value = v,
            }
            if backoff.is_completed() {
                break;
            }
            backoff.snooze();
        }

        // The ring is persistently full: steal the newest published slot.
        let mut backoff = Backoff::new();
        loop {
            match self.try_push(value) {
                Ok(_) => return ForcedPush::Queued,
                Err(v) => value = v,
            }
            let wp = self.write_pos.load(Ordering::Acquire);
            let rp = self.read_pos.load(Ordering::Acquire);
            if wp == rp {
                // Drained in the meantime; retry normal admission.
                continue;
            }
            let newest = self.entry(wp.wrapping_sub(1));
            if newest
                .state
                .compare_exchange(READY, WRITING, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: the Ready -> Writing CAS gives this thread exclusive
                // access to the slot; the previous value is fully initialized
                // because Ready is only stored after the value write.
                let old = unsafe {
                    let slot = (*newest.value.get()).as_mut_ptr();
                    let old = ptr::read(slot);
                    ptr::write(slot, value);
                    old
                };
                newest.state.store(READY, Ordering::Release);
                return ForcedPush::Replaced(old);
            }
            // Newest entry is mid-write or mid-read; rare and short.
            backoff.snooze();
            if backoff.is_completed() {
                backoff.reset();
            }
        }
    }

    /// Internal: complete a reservation by moving the value in and
    /// publishing Ready.
    fn publish(&self, pos: u64, value: T) {
        let entry = self.entry(pos);
        // The slot can still be Reading for a moment if the consumer released
        // the previous lap's value but has not yet advanced read_pos when we
        // sampled it. One short spin covers that window.
        let mut backoff = Backoff::new();
        while entry
            .state
            .compare_exchange(VACANT, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
            if backoff.is_completed() {
                backoff.reset();
            }
        }
        // SAFETY: exclusive slot access between the Writing CAS above and the
        // Ready store below; the position was reserved by exactly one
        // producer.
        unsafe {
            (*entry.value.get()).write(value);
        }
        entry.state.store(READY, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // CONSUMER API (single consumer)
    // ---------------------------------------------------------------------

    /// Attempts to consume the entry at the read position.
    pub fn try_pop(&self) -> Pop<T> {
        let rp = self.read_pos.load(Ordering::Relaxed);
        let wp = self.write_pos.load(Ordering::Acquire);
        if rp == wp {
            return Pop::Empty;
        }

        let entry = self.entry(rp);
        if entry
            .state
            .compare_exchange(READY, READING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Pop::Pending;
        }

        // SAFETY: the Ready -> Reading CAS synchronizes with the producer's
        // Release store of Ready, so the value is initialized, and gives the
        // consumer exclusive access to the slot.
        let value = unsafe { (*entry.value.get()).as_ptr().read() };
        entry.state.store(VACANT, Ordering::Release);

        let next = rp.wrapping_add(1);
        debug_assert_head_order!(next, wp);
        self.read_pos.store(next, Ordering::Release);
        Pop::Popped(value)
    }

    /// Shutdown drain: consume everything, spinning on gaps until `deadline`.
    ///
    /// Returns the number of reserved positions abandoned because a gap did
    /// not resolve in time. The ring must not be reused for normal traffic
    /// after a non-zero return; the abandoned reservations are gone for good.
    pub fn drain_with_deadline<F: FnMut(T)>(&self, deadline: Instant, mut sink: F) -> u64 {
        let mut backoff = Backoff::new();
        loop {
            match self.try_pop() {
                Pop::Popped(value) => {
                    sink(value);
                    backoff.reset();
                }
                Pop::Empty => return 0,
                Pop::Pending => {
                    if Instant::now() >= deadline {
                        return self.len() as u64;
                    }
                    backoff.snooze();
                    if backoff.is_completed() {
                        backoff.reset();
                    }
                }
            }
        }
    }
}

impl<T> Drop for SlotRing<T> {
    fn drop(&mut self) {
        // Drop published-but-unconsumed values. Reserved slots that never
        // reached Ready hold uninitialized memory and are left alone.
        let rp = self.read_pos.load(Ordering::Relaxed);
        let wp = self.write_pos.load(Ordering::Relaxed);
        let mut pos = rp;
        while pos != wp {
            let idx = (pos & self.mask) as usize;
            let entry = &mut self.entries[idx];
            if *entry.state.get_mut() == READY {
                // SAFETY: Ready implies the slot holds an initialized value
                // and no other thread can touch it during drop.
                unsafe {
                    ptr::drop_in_place((*entry.value.get()).as_mut_ptr());
                }
                *entry.state.get_mut() = VACANT;
            }
            pos = pos.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_pop_roundtrip() {
        let ring = SlotRing::<u64>::with_capacity(8);
        assert_eq!(ring.capacity(), 8);

        assert!(matches!(ring.try_push(1), Ok(true)));
        assert!(matches!(ring.try_push(2), Ok(false)));
        assert_eq!(ring.len(), 2);

        match ring.try_pop() {
            Pop::Popped(v) => assert_eq!(v, 1),
            other => panic!("unexpected: {other:?}"),
        }
        match ring.try_pop() {
            Pop::Popped(v) => assert_eq!(v, 2),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(ring.try_pop(), Pop::Empty));
    }

    #[test]
    fn test_capacity_rounding_and_minimum() {
        assert_eq!(SlotRing::<u8>::with_capacity(0).capacity(), 2);
        assert_eq!(SlotRing::<u8>::with_capacity(2).capacity(), 2);
        assert_eq!(SlotRing::<u8>::with_capacity(5).capacity(), 8);
    }

    #[test]
    fn test_full_ring_rejects_push() {
        let ring = SlotRing::<u64>::with_capacity(4);
        for i in 0..4 {
            assert!(ring.try_push(i).is_ok());
        }
        assert_eq!(ring.try_push(99), Err(99));
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_minimum_capacity_single_producer_consumer() {
        let ring = Arc::new(SlotRing::<u64>::with_capacity(2));
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    ring.push_wait(i);
                }
            })
        };

        let mut expected = 0u64;
        while expected < 1000 {
            match ring.try_pop() {
                Pop::Popped(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                Pop::Empty | Pop::Pending => std::hint::spin_loop(),
            }
        }
        producer.join().unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_forced_push_replaces_newest_when_full() {
        let ring = SlotRing::<u64>::with_capacity(4);
        for i in 0..4 {
            assert!(ring.try_push(i).is_ok());
        }
        match ring.push_forced(42) {
            ForcedPush::Replaced(old) => assert_eq!(old, 3),
            ForcedPush::Queued => panic!("expected replacement on a full ring"),
        }
        let mut drained = Vec::new();
        while let Pop::Popped(v) = ring.try_pop() {
            drained.push(v);
        }
        assert_eq!(drained, vec![0, 1, 2, 42]);
    }

    #[test]
    fn test_forced_push_queues_when_space_available() {
        let ring = SlotRing::<u64>::with_capacity(4);
        assert!(ring.try_push(1).is_ok());
        assert!(matches!(ring.push_forced(2), ForcedPush::Queued));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_drain_with_deadline_consumes_everything() {
        let ring = SlotRing::<u64>::with_capacity(16);
        for i in 0..10 {
            assert!(ring.try_push(i).is_ok());
        }
        let mut out = Vec::new();
        let abandoned = ring.drain_with_deadline(Instant::now() + Duration::from_secs(1), |v| {
            out.push(v);
        });
        assert_eq!(abandoned, 0);
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_mpsc_all_values_arrive() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: u64 = 5_000;

        let ring = Arc::new(SlotRing::<(usize, u64)>::with_capacity(64));
        let mut handles = Vec::new();
        for id in 0..PRODUCERS {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    ring.push_wait((id, i));
                }
            }));
        }

        let mut last_seen = [0u64; PRODUCERS];
        let mut received = 0usize;
        while received < PRODUCERS * PER_PRODUCER as usize {
            match ring.try_pop() {
                Pop::Popped((id, v)) => {
                    assert_eq!(v, last_seen[id], "per-producer FIFO violated");
                    last_seen[id] += 1;
                    received += 1;
                }
                Pop::Empty | Pop::Pending => std::hint::spin_loop(),
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_drop_releases_unconsumed_values() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct Counted(Arc<std::sync::atomic::AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let ring = SlotRing::<Counted>::with_capacity(8);
        for _ in 0..5 {
            assert!(ring.try_push(Counted(Arc::clone(&counter))).is_ok());
        }
        if let Pop::Popped(v) = ring.try_pop() {
            drop(v);
        }
        drop(ring);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
