use crate::admission::{admit, Admit};
use crate::record::{Record, RecordKind};
use crate::stats::{AsyncStats, StatsSnapshot};
use crate::target::{ConfigError, Target, TargetError};
use crossbeam_utils::CachePadded;
use slotring::{AtomicBitset, Backoff, CongestionPolicy, Pop, SlotRing};
use std::cell::RefCell;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// =============================================================================
// TOPOLOGY
// =============================================================================
//
// Under flooding, the shared ring of the quantum target bottlenecks on
// write-position contention. Here every producer thread owns a private SPSC
// ring instead, which removes producer-producer contention but destroys
// global ordering: records written concurrently by different threads have
// interleaved timestamps. Order is restored downstream:
//
//   producers -> per-thread rings -> reader pool -> sorting funnel
//            -> sorting/shipping thread -> sub-target
//
// Readers publish, per thread slot, the maximum timestamp of each extracted
// batch. The sorting thread derives a safe watermark W as the minimum of
// those maxima over live slots: a thread's clock cannot go backwards, and
// records are stamped inside the ring reservation, so everything a live
// thread produces from now on carries a timestamp >= its published maximum.
// Funnel records with timestamps <= W are stable (no future arrival can
// predate them), so they can be sorted and shipped.
//
// The one relaxation: a slot that has never published yet is ignored by the
// watermark, so records racing the very first extraction of a brand-new
// thread may ship out of order. This is bounded by the first-log latency of
// that thread and documented as a limitation.
//
// =============================================================================

/// Configuration for [`MultiQuantumTarget`].
#[derive(Debug, Clone)]
pub struct MultiQuantumConfig {
    /// Capacity of each per-thread ring buffer (rounded up to a power of
    /// two).
    pub ring_buffer_size: usize,
    /// Number of reader threads; each is assigned a contiguous range of
    /// slot words.
    pub reader_count: usize,
    /// Reader iterations between scans of every live thread's ring, hint
    /// bits or not.
    pub active_revisit_period: u64,
    /// Reader iterations between scans of every slot in range, live or not.
    pub full_revisit_period: u64,
    /// Maximum records extracted from one ring per visit. Higher is more
    /// cache-friendly but widens the sorting window.
    pub max_batch_size: usize,
    /// Sleep after a reader iteration that extracted nothing. Zero means a
    /// tight loop.
    pub collect_period: Duration,
    pub congestion_policy: CongestionPolicy,
    /// Maximum number of concurrently registered producer threads.
    pub max_threads: usize,
    /// Bound on shutdown drain and synchronous flush waits.
    pub shutdown_timeout: Duration,
}

impl Default for MultiQuantumConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 1024,
            reader_count: 1,
            active_revisit_period: 64,
            full_revisit_period: 256,
            max_batch_size: 16,
            collect_period: Duration::from_millis(50),
            congestion_policy: CongestionPolicy::Wait,
            max_threads: 64,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl MultiQuantumConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_buffer_size < 2 {
            return Err(ConfigError::RingBufferTooSmall(self.ring_buffer_size));
        }
        if self.reader_count == 0 {
            return Err(ConfigError::NoReaders);
        }
        if self.max_threads == 0 {
            return Err(ConfigError::NoThreadSlots);
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if self.active_revisit_period == 0 || self.full_revisit_period == 0 {
            return Err(ConfigError::ZeroRevisitPeriod);
        }
        Ok(())
    }

    /// The funnel is deliberately oversized relative to a single per-thread
    /// ring so readers can accumulate a window wide enough to cover
    /// inter-thread timestamp skew.
    fn funnel_capacity(&self) -> usize {
        (self.ring_buffer_size * self.max_threads / self.reader_count)
            .max(self.ring_buffer_size * 2)
    }
}

/// Per-thread-ring delivery with global timestamp-order restoration.
///
/// Producers are wait-free apart from the write-position reservation and the
/// per-entry state CAS of their own ring. A pool of reader threads moves
/// records into the sorting funnel; a single sorting thread restores global
/// timestamp order up to the safe watermark and ships to the sub-target.
///
/// Delivery order: non-decreasing timestamps, except possibly around the
/// very first record of a newly registered thread (see the module notes);
/// within one producer thread, delivery order always equals production
/// order.
pub struct MultiQuantumTarget {
    shared: Arc<MultiShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    flush_seq: AtomicU64,
    target_id: usize,
}

struct MultiShared {
    rings: Box<[SlotRing<Record>]>,
    /// Bit set while a live thread owns the slot.
    active_threads: AtomicBitset,
    /// Hint: the slot's ring currently holds unread entries. May lag;
    /// periodic revisits self-heal a stale hint.
    active_rings: AtomicBitset,
    /// Slots whose poison has been consumed; excluded from the watermark.
    dead_slots: AtomicBitset,
    /// Per slot: maximum timestamp of the last extracted batch.
    /// `u64::MAX` means "nothing published", which drops out of the
    /// minimum naturally.
    published: Box<[CachePadded<AtomicU64>]>,
    funnel: SlotRing<Record>,
    sub: Arc<dyn Target>,
    config: MultiQuantumConfig,
    stats: AsyncStats,
    running: AtomicBool,
    stopping: AtomicBool,
    /// Raised on an internal invariant violation; the target degrades to
    /// drained-only and readers stop blocking on the funnel.
    fault: AtomicBool,
    live_readers: AtomicUsize,
    flush_done: Mutex<u64>,
    flush_cv: Condvar,
}

/// TLS entry binding a thread to its slot; dropping it (thread exit)
/// releases the slot back to the registry after the ring is drained.
struct SlotLease {
    shared: Weak<MultiShared>,
    slot: usize,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.retire_slot(self.slot);
        }
    }
}

thread_local! {
    static SLOT_LEASES: RefCell<Vec<(usize, SlotLease)>> = const { RefCell::new(Vec::new()) };
}

static NEXT_TARGET_ID: AtomicUsize = AtomicUsize::new(0);

impl MultiQuantumTarget {
    /// Validates the configuration and allocates all rings, bitsets and the
    /// funnel up front. No thread is spawned until [`Target::start`], and no
    /// allocation happens on the log path afterwards.
    pub fn new(sub: Arc<dyn Target>, config: MultiQuantumConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let rings = (0..config.max_threads)
            .map(|_| SlotRing::with_capacity(config.ring_buffer_size))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let published = (0..config.max_threads)
            .map(|_| CachePadded::new(AtomicU64::new(u64::MAX)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            shared: Arc::new(MultiShared {
                rings,
                active_threads: AtomicBitset::new(config.max_threads),
                active_rings: AtomicBitset::new(config.max_threads),
                dead_slots: AtomicBitset::new(config.max_threads),
                published,
                funnel: SlotRing::with_capacity(config.funnel_capacity()),
                sub,
                config,
                stats: AsyncStats::new(),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                fault: AtomicBool::new(false),
                live_readers: AtomicUsize::new(0),
                flush_done: Mutex::new(0),
                flush_cv: Condvar::new(),
            }),
            threads: Mutex::new(Vec::new()),
            flush_seq: AtomicU64::new(0),
            target_id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of thread slots currently owned by live threads.
    pub fn live_thread_slots(&self) -> usize {
        self.shared.active_threads.count_set()
    }

    // ---------------------------------------------------------------------
    // PRODUCER SIDE
    // ---------------------------------------------------------------------

    /// The calling thread's slot, acquiring one on first use. The slot id is
    /// cached in thread-local storage; the lease releases the slot when the
    /// thread exits.
    fn thread_slot(&self) -> Option<usize> {
        SLOT_LEASES.with(|leases| {
            let mut leases = leases.borrow_mut();
            if let Some((_, lease)) = leases.iter().find(|(id, _)| *id == self.target_id) {
                return Some(lease.slot);
            }

            let slot = self.acquire_slot()?;
            leases.push((
                self.target_id,
                SlotLease {
                    shared: Arc::downgrade(&self.shared),
                    slot,
                },
            ));
            Some(slot)
        })
    }

    fn acquire_slot(&self) -> Option<usize> {
        let shared = &self.shared;
        let slot = if shared.config.congestion_policy == CongestionPolicy::Wait {
            let mut backoff = Backoff::new();
            loop {
                if let Some(slot) = shared.active_threads.acquire() {
                    break slot;
                }
                if !shared.running.load(Ordering::Acquire) {
                    return None;
                }
                backoff.snooze();
                if backoff.is_completed() {
                    backoff.reset();
                }
            }
        } else {
            shared.active_threads.acquire()?
        };
        shared.dead_slots.clear(slot);
        shared.published[slot].store(u64::MAX, Ordering::Release);
        Some(slot)
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let shared = &self.shared;
        let words = shared.active_threads.word_count();
        let readers = shared.config.reader_count;
        let chunk = words.div_ceil(readers);
        shared.live_readers.store(readers, Ordering::Release);

        let mut handles = Vec::with_capacity(readers + 1);
        for reader_id in 0..readers {
            let start = (reader_id * chunk).min(words);
            let end = ((reader_id + 1) * chunk).min(words);
            let shared = Arc::clone(shared);
            handles.push(
                thread::Builder::new()
                    .name(format!("logflow-mq-reader-{reader_id}"))
                    .spawn(move || reader_loop(&shared, start..end))
                    .expect("spawn multi-quantum reader"),
            );
        }

        let shared = Arc::clone(shared);
        handles.push(
            thread::Builder::new()
                .name("logflow-mq-sorter".into())
                .spawn(move || sorter_loop(&shared))
                .expect("spawn multi-quantum sorter"),
        );
        handles
    }
}

impl Target for MultiQuantumTarget {
    fn start(&self) -> Result<(), TargetError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TargetError::AlreadyRunning);
        }
        self.shared.sub.start()?;

        self.shared.stopping.store(false, Ordering::Release);
        self.shared.fault.store(false, Ordering::Release);
        for slot in 0..self.shared.config.max_threads {
            self.shared.dead_slots.clear(slot);
            self.shared.published[slot].store(u64::MAX, Ordering::Release);
        }

        *self.threads.lock().unwrap() = self.spawn_workers();
        Ok(())
    }

    fn stop(&self) -> Result<(), TargetError> {
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.shared.stopping.store(true, Ordering::Release);

        // Poison every live ring. Poison bypasses the congestion policy and
        // marks the slot dead once a reader consumes it.
        for slot in 0..self.shared.config.max_threads {
            if self.shared.active_threads.is_set(slot) {
                let mut poison = Record::poison();
                poison.thread = slot as u64;
                admit(
                    &self.shared.rings[slot],
                    self.shared.config.congestion_policy,
                    poison,
                    &self.shared.stats,
                );
                self.shared.active_rings.set(slot);
            }
        }

        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        // Wake synchronous flush callers whose sentinel was lost to the
        // shutdown; they observe the timeout.
        self.shared.flush_cv.notify_all();
        self.shared.sub.stop()
    }

    fn write(&self, mut record: Record) -> u64 {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            if record.is_message() {
                shared.stats.add_drops(1);
            }
            return 0;
        }
        let Some(slot) = self.thread_slot() else {
            // Registry exhausted under a discard policy.
            if record.is_message() {
                shared.stats.add_drops(1);
            }
            return 0;
        };
        record.thread = slot as u64;
        match admit(
            &shared.rings[slot],
            shared.config.congestion_policy,
            record,
            &shared.stats,
        ) {
            Admit::Accepted {
                bytes,
                ring_was_empty,
            } => {
                if ring_was_empty {
                    shared.active_rings.set(slot);
                }
                bytes
            }
            Admit::Rejected => 0,
        }
    }

    /// Synchronous: the sentinel travels the caller's own ring, is sorted
    /// into its timestamp position, and this call returns once the shipping
    /// thread has executed the sub-target flush for it (or a later one).
    ///
    /// Under `DiscardAll` a sentinel that meets a full ring is dropped and
    /// the call returns immediately.
    fn flush(&self) -> Result<(), TargetError> {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(slot) = self.thread_slot() else {
            return Ok(());
        };
        let seq = self.flush_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut sentinel = Record::flush(seq);
        sentinel.thread = slot as u64;
        match admit(
            &shared.rings[slot],
            shared.config.congestion_policy,
            sentinel,
            &shared.stats,
        ) {
            Admit::Accepted { ring_was_empty, .. } => {
                if ring_was_empty {
                    shared.active_rings.set(slot);
                }
            }
            Admit::Rejected => return Ok(()),
        }

        let deadline = Instant::now() + shared.config.shutdown_timeout;
        let mut done = shared.flush_done.lock().unwrap();
        while *done < seq {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TargetError::FlushTimeout(shared.config.shutdown_timeout));
            }
            let (guard, _) = shared.flush_cv.wait_timeout(done, remaining).unwrap();
            done = guard;
        }
        Ok(())
    }

    fn end_target(&self) -> &dyn Target {
        self.shared.sub.end_target()
    }
}

impl Drop for MultiQuantumTarget {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------
// SHARED STATE OPERATIONS
// ---------------------------------------------------------------------

impl MultiShared {
    /// Safe watermark: minimum published batch-maximum over live slots.
    ///
    /// Slots that never published are ignored (the documented first-log
    /// relaxation). `None` means some thread is live but nothing has been
    /// published at all yet. With no live producers everything already
    /// extracted is final, so the watermark is unbounded.
    fn watermark(&self) -> Option<u64> {
        let mut min = u64::MAX;
        let mut any_live = false;
        self.active_threads
            .for_each_set_in_words(0..self.active_threads.word_count(), |slot| {
                if !self.dead_slots.is_set(slot) {
                    any_live = true;
                    let published = self.published[slot].load(Ordering::Acquire);
                    min = min.min(published);
                }
            });
        if !any_live {
            return Some(u64::MAX);
        }
        if min == u64::MAX {
            None
        } else {
            Some(min)
        }
    }

    /// Releases a slot on thread exit. Waits (bounded) for readers to drain
    /// the ring first so a future owner of the slot cannot interleave its
    /// records with the departing thread's.
    fn retire_slot(&self, slot: usize) {
        if self.running.load(Ordering::Acquire) && !self.stopping.load(Ordering::Acquire) {
            let deadline = Instant::now() + self.config.shutdown_timeout;
            let mut backoff = Backoff::new();
            while !self.rings[slot].is_empty() {
                if Instant::now() >= deadline || !self.running.load(Ordering::Acquire) {
                    tracing::warn!(slot, "slot retired before its ring drained");
                    break;
                }
                backoff.snooze();
                if backoff.is_completed() {
                    backoff.reset();
                }
            }
        }
        self.published[slot].store(u64::MAX, Ordering::Release);
        self.active_rings.clear(slot);
        self.active_threads.clear(slot);
    }

    fn complete_flush(&self, seq: u64) {
        let mut done = self.flush_done.lock().unwrap();
        if seq > *done {
            *done = seq;
        }
        drop(done);
        self.flush_cv.notify_all();
    }

    fn ship(&self, record: Record) {
        if self.sub.write(record) == 0 {
            self.stats.add_failed_write();
        }
        self.stats.add_ship();
    }
}

// ---------------------------------------------------------------------
// READER POOL
// ---------------------------------------------------------------------

fn slots_in_words(shared: &MultiShared, words: &Range<usize>) -> Range<usize> {
    let start = words.start * 64;
    let end = (words.end * 64).min(shared.config.max_threads);
    start..end.max(start)
}

fn reader_loop(shared: &MultiShared, words: Range<usize>) {
    let mut iteration: u64 = 0;
    let mut stop_deadline: Option<Instant> = None;

    loop {
        iteration += 1;
        let stopping = shared.stopping.load(Ordering::Acquire);
        let mut extracted = 0usize;

        if stopping || iteration % shared.config.full_revisit_period == 0 {
            // Full revisit: every slot in range, whether or not any hint or
            // thread bit is set. Guarantees a slow producer whose single
            // record was missed by the hints is still drained in bounded
            // time.
            for slot in slots_in_words(shared, &words) {
                extracted += extract_to_funnel(shared, slot);
            }
        } else if iteration % shared.config.active_revisit_period == 0 {
            // Every live thread's ring, even if the non-empty hint was
            // cleared prematurely.
            shared
                .active_threads
                .for_each_set_in_words(words.clone(), |slot| {
                    extracted += extract_to_funnel(shared, slot);
                });
        } else {
            // Fast path: only rings hinted non-empty.
            shared
                .active_rings
                .for_each_set_in_words(words.clone(), |slot| {
                    extracted += extract_to_funnel(shared, slot);
                });
        }

        if stopping {
            let deadline = *stop_deadline
                .get_or_insert_with(|| Instant::now() + shared.config.shutdown_timeout);
            let drained = slots_in_words(shared, &words).all(|slot| shared.rings[slot].is_empty());
            if drained {
                break;
            }
            if Instant::now() >= deadline {
                let remaining: u64 = slots_in_words(shared, &words)
                    .map(|slot| shared.rings[slot].len() as u64)
                    .sum();
                shared.stats.add_drops(remaining);
                tracing::warn!(remaining, "reader shutdown timed out; records dropped");
                break;
            }
            continue;
        }

        if extracted == 0 {
            if shared.config.collect_period.is_zero() {
                std::hint::spin_loop();
            } else {
                thread::sleep(shared.config.collect_period);
            }
        }
    }

    shared.live_readers.fetch_sub(1, Ordering::AcqRel);
}

/// Moves up to `max_batch_size` records from one ring into the funnel and
/// publishes the batch's maximum timestamp for the watermark. Returns the
/// number of records moved.
fn extract_to_funnel(shared: &MultiShared, slot: usize) -> usize {
    let ring = &shared.rings[slot];
    let mut moved = 0usize;
    let mut max_ts = 0u64;
    let mut drained = false;

    while moved < shared.config.max_batch_size {
        match ring.try_pop() {
            Pop::Popped(record) => match record.kind {
                RecordKind::Poison => {
                    // The slot stops participating in the watermark; records
                    // racing in after the poison are still delivered below.
                    shared.dead_slots.set(slot);
                    shared.published[slot].store(u64::MAX, Ordering::Release);
                }
                _ => {
                    if record.is_message() {
                        shared.stats.add_read();
                    }
                    max_ts = max_ts.max(record.timestamp_nanos);
                    push_to_funnel(shared, record);
                    moved += 1;
                }
            },
            Pop::Empty => {
                drained = true;
                break;
            }
            // Producer mid-publication; abandon this ring for now rather
            // than spinning on it.
            Pop::Pending => break,
        }
    }

    if moved > 0 && !shared.dead_slots.is_set(slot) {
        shared.published[slot].store(max_ts, Ordering::Release);
    }
    if drained {
        shared.active_rings.clear(slot);
    }
    moved
}

/// Waits for funnel space (extracted records are already accepted and must
/// not be dropped lightly), but stays shutdown-aware: once stopping begins
/// the wait is bounded so a watermark stall can never wedge `stop`.
fn push_to_funnel(shared: &MultiShared, record: Record) {
    let is_message = record.is_message();
    let mut record = record;
    let mut backoff = Backoff::new();
    let mut stop_deadline: Option<Instant> = None;
    loop {
        if shared.fault.load(Ordering::Relaxed) {
            // Sorter is gone; never block on a funnel nobody drains.
            if shared.funnel.try_push(record).is_err() && is_message {
                shared.stats.add_drops(1);
            } else if is_message {
                shared.stats.add_funnel();
            }
            return;
        }
        match shared.funnel.try_push(record) {
            Ok(_) => {
                if is_message {
                    shared.stats.add_funnel();
                }
                return;
            }
            Err(returned) => record = returned,
        }
        if shared.stopping.load(Ordering::Acquire) {
            let deadline = *stop_deadline
                .get_or_insert_with(|| Instant::now() + shared.config.shutdown_timeout);
            if Instant::now() >= deadline {
                if is_message {
                    shared.stats.add_drops(1);
                }
                tracing::warn!("funnel stayed full through shutdown; record dropped");
                return;
            }
        }
        backoff.snooze();
        if backoff.is_completed() {
            backoff.reset();
        }
    }
}

// ---------------------------------------------------------------------
// SORTING AND SHIPPING
// ---------------------------------------------------------------------

enum FunnelPop {
    Got(Record),
    Empty,
    /// An entry stayed reserved-but-unpublished past the stabilization
    /// deadline.
    Stuck,
}

fn pop_funnel_stable(shared: &MultiShared) -> FunnelPop {
    match shared.funnel.try_pop() {
        Pop::Popped(record) => return FunnelPop::Got(record),
        Pop::Empty => return FunnelPop::Empty,
        Pop::Pending => {}
    }
    let deadline = Instant::now() + shared.config.shutdown_timeout;
    let mut backoff = Backoff::new();
    loop {
        match shared.funnel.try_pop() {
            Pop::Popped(record) => return FunnelPop::Got(record),
            Pop::Empty => return FunnelPop::Empty,
            Pop::Pending => {
                if Instant::now() >= deadline {
                    return FunnelPop::Stuck;
                }
                backoff.snooze();
                if backoff.is_completed() {
                    backoff.reset();
                }
            }
        }
    }
}

fn sorter_loop(shared: &MultiShared) {
    // Records pulled from the funnel but not yet admitted by the watermark.
    let mut carry: Vec<Record> = Vec::new();

    loop {
        let stopping = shared.stopping.load(Ordering::Acquire);
        let draining = stopping && shared.live_readers.load(Ordering::Acquire) == 0;

        let mut pulled = 0usize;
        // The carry is capped at the funnel capacity so backpressure still
        // reaches producers: when the watermark stalls, readers block on the
        // full funnel, rings fill, and the congestion policy takes over.
        while carry.len() < shared.funnel.capacity() {
            match pop_funnel_stable(shared) {
                FunnelPop::Got(record) => {
                    carry.push(record);
                    pulled += 1;
                }
                FunnelPop::Empty => break,
                FunnelPop::Stuck => {
                    let mut abandoned = shared.funnel.len() as u64;
                    shared.fault.store(true, Ordering::Release);
                    for record in carry.drain(..) {
                        match record.kind {
                            RecordKind::Message => abandoned += 1,
                            RecordKind::Flush(seq) => shared.complete_flush(seq),
                            RecordKind::Poison => {}
                        }
                    }
                    shared.stats.add_drops(abandoned);
                    tracing::error!(
                        abandoned,
                        "funnel entry never stabilized; sorter exiting, target is drained-only"
                    );
                    return;
                }
            }
        }

        let watermark = if draining {
            Some(u64::MAX)
        } else {
            shared.watermark()
        };

        let mut shipped = 0usize;
        if !carry.is_empty() {
            if let Some(watermark) = watermark {
                // Stable sort, tie-broken by slot id: equal-timestamp
                // records from one thread keep their funnel (production)
                // order.
                carry.sort_by_key(|r| (r.timestamp_nanos, r.thread));
                let cut = carry.partition_point(|r| r.timestamp_nanos <= watermark);
                for record in carry.drain(..cut) {
                    match record.kind {
                        RecordKind::Message => shared.ship(record),
                        RecordKind::Flush(seq) => {
                            if shared.sub.flush().is_ok() {
                                shared.stats.add_flush();
                            }
                            shared.complete_flush(seq);
                        }
                        RecordKind::Poison => {}
                    }
                    shipped += 1;
                }
            }
        }

        if draining && pulled == 0 && carry.is_empty() && shared.funnel.is_empty() {
            break;
        }
        if pulled == 0 && shipped == 0 && !draining {
            if shared.config.collect_period.is_zero() {
                std::hint::spin_loop();
            } else {
                thread::sleep(shared.config.collect_period);
            }
        }
    }

    if shared.sub.flush().is_ok() {
        shared.stats.add_flush();
    }
}
