use crate::record::Record;
use crate::stats::{AsyncStats, StatsSnapshot};
use crate::target::{Target, TargetError};
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// Mutex-and-condvar hand-off to a single worker thread.
///
/// The correctness baseline among the delivery strategies: producers append
/// to a locked queue and signal the worker, which swaps the queue out under
/// the lock and performs sub-target I/O outside it. Not latency-optimized;
/// see [`QuantumTarget`](crate::QuantumTarget) for the lock-free path.
pub struct DeferredTarget {
    shared: Arc<DeferredShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    flush_seq: AtomicU64,
}

struct DeferredShared {
    sub: Arc<dyn Target>,
    queue: Mutex<QueueState>,
    available: Condvar,
    stats: AsyncStats,
}

#[derive(Default)]
struct QueueState {
    records: VecDeque<Record>,
    stop: bool,
}

impl DeferredTarget {
    pub fn new(sub: Arc<dyn Target>) -> Self {
        Self {
            shared: Arc::new(DeferredShared {
                sub,
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
            queue.records.push_back(record);
        }
        // Sentinels travel the same queue but stay out of the record
        // accounting.
        if is_message {
            self.shared.stats.add_write();
        }
        self.shared.available.notify_one();
        bytes
    }

    fn worker_loop(shared: &DeferredShared) {
        loop {
            let batch = {
                let mut queue = shared.queue.lock().unwrap();
                while queue.records.is_empty() && !queue.stop {
                    queue = shared.available.wait(queue).unwrap();
                }
                if queue.records.is_empty() {
                    break;
                }
                mem::take(&mut queue.records)
            };

            // Sub-target I/O happens outside the lock.
            for record in batch {
                if record.is_flush() {
                    if shared.sub.flush().is_ok() {
                        shared.stats.add_flush();
                    }
                } else {
                    shared.stats.add_read();
                    if shared.sub.write(record) == 0 {
                        shared.stats.add_failed_write();
                    }
                    shared.stats.add_ship();
                }
            }
        }

        if shared.sub.flush().is_ok() {
            shared.stats.add_flush();
        }
    }
}

impl Target for DeferredTarget {
    fn start(&self) -> Result<(), TargetError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TargetError::AlreadyRunning);
        }
        self.shared.sub.start()?;
        self.shared.queue.lock().unwrap().stop = false;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("logflow-deferred".into())
            .spawn(move || DeferredTarget::worker_loop(&shared))
            .expect("spawn deferred worker");
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

    /// Enqueues a flush sentinel and returns immediately; the worker honors
    /// sentinels in queue order.
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

impl Drop for DeferredTarget {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
