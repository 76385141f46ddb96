use crate::admission::{admit, Admit};
use crate::record::{Record, RecordKind};
use crate::stats::{AsyncStats, StatsSnapshot};
use crate::target::{ConfigError, Target, TargetError};
use slotring::{CongestionPolicy, Pop, SlotRing};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Configuration for [`QuantumTarget`].
#[derive(Debug, Clone)]
pub struct QuantumConfig {
    /// Capacity of the shared ring buffer (rounded up to a power of two).
    pub ring_buffer_size: usize,
    /// Maximum records consumed per reader iteration.
    pub max_batch_size: usize,
    /// Sleep between empty reader iterations. Zero means a tight loop that
    /// pins a CPU core.
    pub collect_period: Duration,
    pub congestion_policy: CongestionPolicy,
    /// Bound on the shutdown drain; records still stuck after this are
    /// dropped and counted.
    pub shutdown_timeout: Duration,
}

impl Default for QuantumConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 65_536,
            max_batch_size: 256,
            collect_period: Duration::from_millis(50),
            congestion_policy: CongestionPolicy::Wait,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl QuantumConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_buffer_size < 2 {
            return Err(ConfigError::RingBufferTooSmall(self.ring_buffer_size));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        Ok(())
    }
}

/// Lock-free single-ring delivery: all producers share one MPSC ring
/// buffer, one reader thread drains it towards the sub-target.
///
/// Built for log flooding scenarios where the logging overhead itself must
/// not perturb the timing under observation: the producer path is wait-free
/// apart from the write-position reservation and the per-entry state CAS.
/// The trade-offs are a bounded buffer (the congestion policy decides what
/// happens when the reader cannot keep up) and, with a zero collect period,
/// one fully busy CPU core.
pub struct QuantumTarget {
    shared: Arc<QuantumShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    flush_seq: AtomicU64,
}

struct QuantumShared {
    ring: SlotRing<Record>,
    sub: Arc<dyn Target>,
    config: QuantumConfig,
    stats: AsyncStats,
}

impl QuantumTarget {
    /// Validates the configuration and builds the target. No thread is
    /// spawned until [`Target::start`].
    pub fn new(sub: Arc<dyn Target>, config: QuantumConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(QuantumShared {
                ring: SlotRing::with_capacity(config.ring_buffer_size),
                sub,
                config,
                stats: AsyncStats::new(),
            }),
            reader: Mutex::new(None),
            running: AtomicBool::new(false),
            flush_seq: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn ship(shared: &QuantumShared, record: Record) {
        if shared.sub.write(record) == 0 {
            shared.stats.add_failed_write();
        }
        shared.stats.add_ship();
    }

    fn reader_loop(shared: &QuantumShared) {
        let mut poisoned = false;
        while !poisoned {
            let mut extracted = 0usize;
            while extracted < shared.config.max_batch_size {
                match shared.ring.try_pop() {
                    Pop::Popped(record) => {
                        extracted += 1;
                        match record.kind {
                            RecordKind::Message => {
                                shared.stats.add_read();
                                Self::ship(shared, record);
                            }
                            RecordKind::Flush(_) => {
                                if shared.sub.flush().is_ok() {
                                    shared.stats.add_flush();
                                }
                            }
                            RecordKind::Poison => {
                                poisoned = true;
                                break;
                            }
                        }
                    }
                    // Empty ring, or a producer still publishing the entry
                    // at the read position; revisit next iteration.
                    Pop::Empty | Pop::Pending => break,
                }
            }

            if !poisoned && extracted == 0 {
                if shared.config.collect_period.is_zero() {
                    std::hint::spin_loop();
                } else {
                    thread::sleep(shared.config.collect_period);
                }
            }
        }

        // Shutdown drain: everything still in the ring, bounded by the
        // shutdown timeout, then one final sub-target flush.
        let deadline = Instant::now() + shared.config.shutdown_timeout;
        let abandoned = shared.ring.drain_with_deadline(deadline, |record| match record.kind {
            RecordKind::Message => {
                shared.stats.add_read();
                Self::ship(shared, record);
            }
            RecordKind::Flush(_) => {
                if shared.sub.flush().is_ok() {
                    shared.stats.add_flush();
                }
            }
            RecordKind::Poison => {}
        });
        if abandoned > 0 {
            shared.stats.add_drops(abandoned);
            tracing::warn!(abandoned, "shutdown drain timed out; records dropped");
        }
        if shared.sub.flush().is_ok() {
            shared.stats.add_flush();
        }
    }
}

impl Target for QuantumTarget {
    fn start(&self) -> Result<(), TargetError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TargetError::AlreadyRunning);
        }
        self.shared.sub.start()?;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("logflow-quantum".into())
            .spawn(move || QuantumTarget::reader_loop(&shared))
            .expect("spawn quantum reader");
        *self.reader.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn stop(&self) -> Result<(), TargetError> {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        admit(
            &self.shared.ring,
            self.shared.config.congestion_policy,
            Record::poison(),
            &self.shared.stats,
        );
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.shared.sub.stop()
    }

    fn write(&self, record: Record) -> u64 {
        if !self.running.load(Ordering::Acquire) {
            if record.is_message() {
                self.shared.stats.add_drops(1);
            }
            return 0;
        }
        match admit(
            &self.shared.ring,
            self.shared.config.congestion_policy,
            record,
            &self.shared.stats,
        ) {
            Admit::Accepted { bytes, .. } => bytes,
            Admit::Rejected => 0,
        }
    }

    /// Fire-and-forget: places a flush sentinel in the ring and returns
    /// without waiting for the reader to process it. Under `DiscardAll` the
    /// sentinel is dropped when the ring is full.
    fn flush(&self) -> Result<(), TargetError> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let seq = self.flush_seq.fetch_add(1, Ordering::Relaxed) + 1;
        admit(
            &self.shared.ring,
            self.shared.config.congestion_policy,
            Record::flush(seq),
            &self.shared.stats,
        );
        Ok(())
    }

    fn end_target(&self) -> &dyn Target {
        self.shared.sub.end_target()
    }
}

impl Drop for QuantumTarget {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
