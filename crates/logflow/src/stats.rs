use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe delivery counters kept by every asynchronous target.
///
/// Producers, readers and the shipping thread all bump these concurrently,
/// so the fields are atomics; [`AsyncStats::snapshot`] yields a plain-value
/// copy for inspection.
#[derive(Debug, Default)]
pub struct AsyncStats {
    /// Records accepted into the target (not dropped at admission).
    write_count: AtomicU64,
    /// Records extracted from ring buffers by reader threads.
    read_count: AtomicU64,
    /// Records moved into the sorting funnel (multi-quantum only).
    funnel_count: AtomicU64,
    /// Records handed to the sub-target's `write`.
    ship_count: AtomicU64,
    /// Records dropped by congestion policy, slot exhaustion or shutdown
    /// overrun.
    drop_count: AtomicU64,
    /// Sub-target `write` calls that returned zero bytes.
    failed_write_count: AtomicU64,
    /// Sub-target `flush` invocations.
    flush_count: AtomicU64,
}

impl AsyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_read(&self) {
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_funnel(&self) {
        self.funnel_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_ship(&self) {
        self.ship_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_drops(&self, n: u64) {
        if n > 0 {
            self.drop_count.fetch_add(n, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_failed_write(&self) {
        self.failed_write_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain-value snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            write_count: self.write_count.load(Ordering::Relaxed),
            read_count: self.read_count.load(Ordering::Relaxed),
            funnel_count: self.funnel_count.load(Ordering::Relaxed),
            ship_count: self.ship_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            failed_write_count: self.failed_write_count.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a target's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub write_count: u64,
    pub read_count: u64,
    pub funnel_count: u64,
    pub ship_count: u64,
    pub drop_count: u64,
    pub failed_write_count: u64,
    pub flush_count: u64,
}
