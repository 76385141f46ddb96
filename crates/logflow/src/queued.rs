use crate::record::Record;
use crate::stats::{AsyncStats, StatsSnapshot};
use crate::target::{Target, TargetError};
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Configuration for the batching target.
#[derive(Debug, Clone)]
pub struct QueuedConfig {
    /// Flush trigger: queue size.
    pub batch_size: usize,
    /// Flush trigger: age of the oldest unflushed record.
    pub batch_timeout: Duration,
}

impl Default for QueuedConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            batch_timeout: Duration::from_millis(100),
        }
    }
}

/// Batching accumulator with size and time triggers.
///
/// Same producer/consumer shape as [`DeferredTarget`](crate::DeferredTarget)
/// but the worker ships a whole batch and calls the sub-target's `flush`
/// once per batch. This amortizes per-record I/O overhead for sinks with an
/// expensive flush.
pub struct QueuedTarget {
    shared: Arc<QueuedShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    flush_seq: AtomicU64,
}

struct QueuedShared {
    sub: Arc<dyn Target>,
    config: QueuedConfig,
    queue: Mutex<QueueState>,
    available: Condvar,
    stats: AsyncStats,
}

#[derive(Default)]
struct QueueState {
    records: VecDeque<Record>,
    /// Arrival time of the oldest record since the last batch was taken.
    oldest: Option<Instant>,
    stop: bool,
}

impl QueuedTarget {
    pub fn new(sub: Arc<dyn Target>, config: QueuedConfig) -> Self {
        let config = QueuedConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            shared: Arc::new(QueuedShared {
                sub,
                config,
                queue: Mutex::new(QueueState::default()),
                available: Condvar::new(),
                stats: AsyncStats::new(),
            }),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            flush_seq: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn enqueue(&self, record: Record) -> u64 {
        let bytes = record.message.len() as u64;
        let is_message = record.is_message();
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.stop {
                if is_message {
                    self.shared.stats.add_drops(1);
                }
                return 0;
            }
            if queue.oldest.is_none() {
                queue.oldest = Some(Instant::now());
            }
            queue.records.push_back(record);
        }
        if is_message {
            self.shared.stats.add_write();
        }
        self.shared.available.notify_one();
        bytes
    }

    fn worker_loop(shared: &QueuedShared) {
        loop {
            let batch = {
                let mut queue = shared.queue.lock().unwrap();
                loop {
                    if queue.stop || queue.records.len() >= shared.config.batch_size {
                        break;
                    }
                    match queue.oldest {
                        Some(oldest) => {
                            let age = oldest.elapsed();
                            if age >= shared.config.batch_timeout {
                                break;
                            }
                            let (guard, _) = shared
                                .available
                                .wait_timeout(queue, shared.config.batch_timeout - age)
                                .unwrap();
                            queue = guard;
                        }
                        None => queue = shared.available.wait(queue).unwrap(),
                    }
                }
                if queue.records.is_empty() {
                    if queue.stop {
                        return;
                    }
                    // Timer fired against an already-taken batch; rearm.
                    queue.oldest = None;
                    continue;
                }
                queue.oldest = None;
                mem::take(&mut queue.records)
            };

            Self::deliver(shared, batch);
        }
    }

    fn deliver(shared: &QueuedShared, batch: VecDeque<Record>) {
        let mut unflushed = false;
        for record in batch {
            if record.is_flush() {
                if shared.sub.flush().is_ok() {
                    shared.stats.add_flush();
                }
                unflushed = false;
            } else {
                shared.stats.add_read();
                if shared.sub.write(record) == 0 {
                    shared.stats.add_failed_write();
                }
                shared.stats.add_ship();
                unflushed = true;
            }
        }
        // One flush per batch, unless an in-band sentinel already covered
        // the tail of the batch.
        if unflushed && shared.sub.flush().is_ok() {
            shared.stats.add_flush();
        }
    }
}

impl Target for QueuedTarget {
    fn start(&self) -> Result<(), TargetError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TargetError::AlreadyRunning);
        }
        self.shared.sub.start()?;
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stop = false;
            queue.oldest = None;
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("logflow-queued".into())
            .spawn(move || QueuedTarget::worker_loop(&shared))
            .expect("spawn queued worker");
        *self.worker.lock().unwrap() = Some(handle);
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
        self.shared.queue.lock().unwrap().stop = true;
        self.shared.available.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.shared.sub.stop()
    }

    fn write(&self, record: Record) -> u64 {
        if !self.running.load(Ordering::Acquire) {
            self.shared.stats.add_drops(1);
            return 0;
        }
        self.enqueue(record)
    }

    /// Enqueues a flush sentinel and returns immediately.
    fn flush(&self) -> Result<(), TargetError> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let seq = self.flush_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.enqueue(Record::flush(seq));
        Ok(())
    }

    fn end_target(&self) -> &dyn Target {
        self.shared.sub.end_target()
    }
}

impl Drop for QueuedTarget {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
